use serde::Serialize;
use tracing::{info, warn};

use herald_store::TaskStore;

use crate::error::Result;
use crate::registry::JobRegistry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub failed: usize,
}

/// Register a job for every active task in the store.
///
/// Run once at startup, before the engine loop is spawned. A task whose
/// trigger no longer compiles is logged and skipped; only a store failure
/// aborts.
pub fn reconcile(store: &TaskStore, registry: &JobRegistry) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for task in store.list_active_tasks()? {
        match registry.add(task.id, &task.trigger) {
            Ok(_) => report.scheduled += 1,
            Err(e) => {
                warn!(task_id = %task.id, name = %task.name, error = %e, "task not scheduled");
                report.failed += 1;
            }
        }
    }
    info!(scheduled = report.scheduled, failed = report.failed, "reconciled live jobs with store");
    Ok(report)
}
