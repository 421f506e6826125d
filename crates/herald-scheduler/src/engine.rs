use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use herald_core::TaskId;

use crate::registry::{FireDecision, InFlightGuard, JobRegistry};

/// Receives fired jobs. Implementations own their error handling: nothing
/// they do can reach the engine loop.
#[async_trait]
pub trait JobDispatcher: Send + Sync + 'static {
    async fn fire(&self, task_id: TaskId);
}

/// Outcome of one engine tick, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: Vec<TaskId>,
    pub misfired: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
}

/// Drives the registry: once a second, every due job is coalesced, checked
/// against the misfire grace and the one-instance rule, and handed to the
/// worker pool.
pub struct SchedulerEngine {
    registry: Arc<JobRegistry>,
    dispatcher: Arc<dyn JobDispatcher>,
    workers: Arc<Semaphore>,
    misfire_grace: TimeDelta,
}

impl SchedulerEngine {
    pub fn new(
        registry: Arc<JobRegistry>,
        dispatcher: Arc<dyn JobDispatcher>,
        workers: usize,
        misfire_grace: TimeDelta,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            misfire_grace,
        }
    }

    /// Main event loop. Ticks every second until `shutdown` broadcasts `true`.
    ///
    /// Executions already handed to workers are not awaited on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(jobs = self.registry.len(), "scheduler engine started");

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub(crate) fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        for due in self.registry.collect_due(now, self.misfire_grace) {
            let id = due.task_id;
            match due.decision {
                FireDecision::Misfired => {
                    warn!(
                        task_id = %id,
                        scheduled_for = %due.scheduled_for,
                        late_by_secs = (now - due.scheduled_for).num_seconds(),
                        "fire missed its grace period, dropped"
                    );
                    report.misfired.push(id);
                }
                FireDecision::Busy => {
                    warn!(task_id = %id, "previous run still in progress, fire skipped");
                    report.skipped.push(id);
                }
                FireDecision::Dispatch => {
                    debug!(task_id = %id, scheduled_for = %due.scheduled_for, "dispatching");
                    let guard = InFlightGuard::new(self.registry.clone(), id);
                    let workers = self.workers.clone();
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        // Closed only if the semaphore is dropped; never here.
                        let Ok(_permit) = workers.acquire_owned().await else {
                            return;
                        };
                        dispatcher.fire(id).await;
                    });
                    report.dispatched.push(id);
                }
            }
        }
        report
    }
}
