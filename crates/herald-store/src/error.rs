use herald_core::TaskId;
use thiserror::Error;

/// Errors that can occur within the task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No task with the given ID exists.
    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    /// No run with the given ID exists.
    #[error("Run not found: {id}")]
    RunNotFound { id: i64 },

    /// No feed result with the given ID exists.
    #[error("Result not found: {id}")]
    ResultNotFound { id: i64 },

    /// The run already reached a terminal status and cannot change again.
    #[error("Run {id} is already finished")]
    RunAlreadyFinished { id: i64 },

    /// A run can only be finished with a terminal status.
    #[error("Invalid run transition: {0}")]
    InvalidTransition(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
