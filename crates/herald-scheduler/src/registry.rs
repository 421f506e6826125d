use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info};

use herald_core::TaskId;
use herald_store::{Task, TriggerSpec};

use crate::error::Result;
use crate::trigger::{Trigger, TriggerContext};

struct LiveJob {
    trigger: Trigger,
    /// `None` once the trigger has no further fires.
    next_fire: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<TaskId, LiveJob>,
    /// Tasks with an execution currently running. Survives job replacement so
    /// an edit cannot start a second overlapping run.
    in_flight: HashSet<TaskId>,
}

/// Point-in-time view of one live job.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub task_id: TaskId,
    pub trigger: String,
    pub next_fire: Option<DateTime<Utc>>,
}

/// What the engine should do with one due job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FireDecision {
    /// Marked in flight; hand it to a worker.
    Dispatch,
    /// The latest missed fire is older than the grace period.
    Misfired,
    /// A previous execution is still running.
    Busy,
}

#[derive(Debug, Clone)]
pub(crate) struct DueFire {
    pub task_id: TaskId,
    /// Latest fire time at or before the tick.
    pub scheduled_for: DateTime<Utc>,
    pub decision: FireDecision,
}

/// The set of live jobs, keyed by task id.
///
/// Every mutation takes the one internal lock, so concurrent add/remove for
/// the same id always leaves exactly zero or one job behind.
pub struct JobRegistry {
    inner: Mutex<Inner>,
    ctx: TriggerContext,
}

impl JobRegistry {
    pub fn new(ctx: TriggerContext) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ctx,
        }
    }

    pub fn context(&self) -> &TriggerContext {
        &self.ctx
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) the job for `task_id`. Returns its next fire.
    ///
    /// The trigger is compiled before the lock is taken; an invalid one leaves
    /// any existing job untouched.
    pub fn add(&self, task_id: TaskId, spec: &TriggerSpec) -> Result<Option<DateTime<Utc>>> {
        self.add_at(task_id, spec, Utc::now())
    }

    pub(crate) fn add_at(
        &self,
        task_id: TaskId,
        spec: &TriggerSpec,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let trigger = Trigger::compile(spec, &self.ctx, now)?;
        let next_fire = trigger.next_fire_after(now);

        let replaced = self
            .lock()
            .jobs
            .insert(task_id, LiveJob { trigger, next_fire })
            .is_some();
        info!(
            task_id = %task_id,
            trigger = %spec,
            next_fire = ?next_fire,
            replaced,
            "job scheduled"
        );
        Ok(next_fire)
    }

    /// Drop the job for `task_id`. Returns whether one existed.
    pub fn remove(&self, task_id: TaskId) -> bool {
        let removed = self.lock().jobs.remove(&task_id).is_some();
        if removed {
            info!(task_id = %task_id, "job unscheduled");
        }
        removed
    }

    /// Bring the registry in line with `task`: active tasks are (re)scheduled,
    /// inactive ones removed.
    pub fn sync(&self, task: &Task) -> Result<Option<DateTime<Utc>>> {
        if task.is_active {
            self.add(task.id, &task.trigger)
        } else {
            self.remove(task.id);
            Ok(None)
        }
    }

    pub fn next_fire_time(&self, task_id: TaskId) -> Option<DateTime<Utc>> {
        self.lock().jobs.get(&task_id).and_then(|j| j.next_fire)
    }

    pub fn is_scheduled(&self, task_id: TaskId) -> bool {
        self.lock().jobs.contains_key(&task_id)
    }

    pub fn is_in_flight(&self, task_id: TaskId) -> bool {
        self.lock().in_flight.contains(&task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live jobs, soonest first.
    pub fn snapshot(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .lock()
            .jobs
            .iter()
            .map(|(id, job)| ScheduledJob {
                task_id: *id,
                trigger: job.trigger.to_string(),
                next_fire: job.next_fire,
            })
            .collect();
        jobs.sort_by_key(|j| (j.next_fire.is_none(), j.next_fire, j.task_id));
        jobs
    }

    /// Advance every job due at `now` and decide what to do with it.
    ///
    /// Missed fires are coalesced into one; each returned job's next fire is
    /// already past `now`. Results are ordered by fire time, then task id.
    pub(crate) fn collect_due(&self, now: DateTime<Utc>, grace: TimeDelta) -> Vec<DueFire> {
        let mut guard = self.lock();
        let Inner { jobs, in_flight } = &mut *guard;

        let mut due: Vec<(TaskId, DateTime<Utc>)> = Vec::new();
        for (id, job) in jobs.iter_mut() {
            let Some(pending) = job.next_fire else { continue };
            if pending > now {
                continue;
            }
            let (latest, next) = job.trigger.coalesce(pending, now);
            if latest > pending {
                debug!(task_id = %id, missed_since = %pending, "coalescing missed fires");
            }
            job.next_fire = next;
            due.push((*id, latest));
        }
        due.sort_by_key(|(id, at)| (*at, *id));

        due.into_iter()
            .map(|(task_id, scheduled_for)| {
                let decision = if now - scheduled_for > grace {
                    FireDecision::Misfired
                } else if !in_flight.insert(task_id) {
                    FireDecision::Busy
                } else {
                    FireDecision::Dispatch
                };
                DueFire {
                    task_id,
                    scheduled_for,
                    decision,
                }
            })
            .collect()
    }

    fn clear_in_flight(&self, task_id: TaskId) {
        self.lock().in_flight.remove(&task_id);
    }
}

/// Clears a task's in-flight mark when dropped, including on panic unwind.
pub(crate) struct InFlightGuard {
    registry: Arc<JobRegistry>,
    task_id: TaskId,
}

impl InFlightGuard {
    pub(crate) fn new(registry: Arc<JobRegistry>, task_id: TaskId) -> Self {
        Self { registry, task_id }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.clear_in_flight(self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registry() -> JobRegistry {
        JobRegistry::new(TriggerContext::new(
            chrono_tz::Asia::Shanghai,
            TimeDelta::seconds(10),
        ))
    }

    fn every(secs: u64) -> TriggerSpec {
        TriggerSpec::Interval { every_secs: secs }
    }

    fn cron(expr: &str) -> TriggerSpec {
        TriggerSpec::Cron {
            expression: expr.to_string(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn add_is_idempotent() {
        let reg = registry();
        let id = TaskId(1);
        reg.add(id, &cron("0 9 * * *")).unwrap();
        reg.add(id, &cron("0 9 * * *")).unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.is_scheduled(id));
    }

    #[test]
    fn failed_add_keeps_previous_job() {
        let reg = registry();
        let id = TaskId(7);
        let before = reg.add_at(id, &every(60), t0()).unwrap();

        assert!(reg.add(id, &cron("* * *")).is_err());
        assert!(reg.is_scheduled(id));
        assert_eq!(reg.next_fire_time(id), before);
    }

    #[test]
    fn failed_add_of_new_id_schedules_nothing() {
        let reg = registry();
        assert!(reg.add(TaskId(3), &cron("@hourly")).is_err());
        assert!(!reg.is_scheduled(TaskId(3)));
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_absent_is_noop() {
        let reg = registry();
        assert!(!reg.remove(TaskId(42)));
        reg.add(TaskId(42), &every(5)).unwrap();
        assert!(reg.remove(TaskId(42)));
        assert!(!reg.remove(TaskId(42)));
    }

    #[test]
    fn collect_due_orders_and_advances() {
        let reg = registry();
        reg.add_at(TaskId(2), &every(60), t0()).unwrap();
        reg.add_at(TaskId(1), &every(60), t0()).unwrap();
        reg.add_at(TaskId(3), &every(3600), t0() + TimeDelta::seconds(5)).unwrap();

        let now = t0() + TimeDelta::seconds(11);
        let due = reg.collect_due(now, TimeDelta::seconds(30));
        let ids: Vec<TaskId> = due.iter().map(|d| d.task_id).collect();
        // Same fire time: ordered by id. Task 3 was registered later.
        assert_eq!(ids, vec![TaskId(1), TaskId(2)]);
        assert!(due.iter().all(|d| d.decision == FireDecision::Dispatch));

        for id in [TaskId(1), TaskId(2)] {
            assert!(reg.next_fire_time(id).unwrap() > now);
            assert!(reg.is_in_flight(id));
        }
    }

    #[test]
    fn in_flight_survives_replacement() {
        let reg = Arc::new(registry());
        let id = TaskId(9);
        reg.add_at(id, &every(60), t0()).unwrap();
        let due = reg.collect_due(t0() + TimeDelta::seconds(10), TimeDelta::seconds(30));
        assert_eq!(due[0].decision, FireDecision::Dispatch);

        let guard = InFlightGuard::new(reg.clone(), id);
        reg.add(id, &every(60)).unwrap();
        assert!(reg.is_in_flight(id));
        drop(guard);
        assert!(!reg.is_in_flight(id));
    }

    #[test]
    fn snapshot_lists_soonest_first() {
        let reg = registry();
        reg.add_at(TaskId(1), &every(3600), t0()).unwrap();
        reg.add_at(TaskId(2), &every(60), t0() - TimeDelta::seconds(5)).unwrap();
        reg.add_at(TaskId(3), &cron("0 0 30 2 *"), t0()).unwrap();

        let snap = reg.snapshot();
        let ids: Vec<TaskId> = snap.iter().map(|j| j.task_id).collect();
        assert_eq!(ids, vec![TaskId(2), TaskId(1), TaskId(3)]);
        assert!(snap[2].next_fire.is_none());
    }
}
