//! Error types for the herald-runner crate.

use thiserror::Error;

/// Everything that can stop a payload from producing an [`crate::ExecResult`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The interpreter could not be launched (missing binary, bad cwd, …).
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Underlying I/O failure while collecting the child's output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The child ran past its time budget and was killed.
    #[error("execution timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The task waiting on the child vanished without reporting back.
    #[error("wait task ended unexpectedly")]
    WaitAborted,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RunnerError>;
