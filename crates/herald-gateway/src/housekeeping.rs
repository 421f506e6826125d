use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use herald_store::TaskStore;

const FIRST_RUN_DELAY: Duration = Duration::from_secs(60);
const RUN_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

/// Delete feed results older than `retention_days`. Returns how many went.
pub fn prune(store: &TaskStore, retention_days: u32, now: DateTime<Utc>) -> herald_store::Result<usize> {
    let cutoff = now - TimeDelta::days(i64::from(retention_days));
    store.prune_results(cutoff)
}

/// Retention loop: first pass a minute after start, then daily, until
/// `shutdown` broadcasts `true`.
pub async fn run(store: TaskStore, retention_days: u32, mut shutdown: watch::Receiver<bool>) {
    let start = tokio::time::Instant::now() + FIRST_RUN_DELAY;
    let mut interval = tokio::time::interval_at(start, RUN_EVERY);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match prune(&store, retention_days, Utc::now()) {
                    Ok(n) => info!(deleted = n, retention_days, "pruned old feed results"),
                    Err(e) => error!(error = %e, "result pruning failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_store::{NewTask, TaskKind, TriggerSpec};

    #[test]
    fn prune_respects_retention() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = store
            .create_task(&NewTask {
                name: "topic".into(),
                description: String::new(),
                kind: TaskKind::Topic,
                trigger: TriggerSpec::Interval { every_secs: 3600 },
                payload: "q".into(),
                is_active: false,
            })
            .unwrap();
        let now = Utc::now();
        store.add_result_at(task.id, "old", now - TimeDelta::days(3)).unwrap();
        store.add_result_at(task.id, "fresh", now - TimeDelta::hours(2)).unwrap();

        assert_eq!(prune(&store, 2, now).unwrap(), 1);
        let left = store.list_results(task.id, 10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].content, "fresh");
    }
}
