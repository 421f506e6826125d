//! Shared data types for herald-runner.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-execution limits.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Wall-clock budget. The child's whole process group is killed when it
    /// runs longer.
    pub timeout: Duration,

    /// Cap applied to each captured stream, in characters.
    ///
    /// Middle-omission truncation, see [`crate::truncate::cap_output`].
    pub max_output_chars: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_output_chars: 200_000,
        }
    }
}

/// Captured result of a child that ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    /// Process exit code; `-1` when the child was ended by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
