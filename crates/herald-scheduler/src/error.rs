use herald_core::{HeraldError, TaskId};
use herald_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The trigger definition does not compile.
    #[error("Invalid trigger: {0}")]
    InvalidSpec(String),

    #[error("Task not found: {task_id}")]
    NotFound { task_id: TaskId },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] HeraldError),
}

impl From<StoreError> for SchedulerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TaskNotFound { id } => SchedulerError::NotFound { task_id: id },
            other => SchedulerError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
