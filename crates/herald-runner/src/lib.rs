//! herald-runner: runs task payloads in isolated child processes.
//!
//! The payload is handed to an external interpreter (`python3 -c <payload>`
//! by default) in its own process group, with a cleared environment plus an
//! explicit allow-list, a wall-clock timeout and captured output.
//!
//! ```rust,no_run
//! use herald_runner::{ExecOptions, ScriptRunner};
//!
//! # async fn demo() -> herald_runner::Result<()> {
//! let runner = ScriptRunner::new("python3", ["-c"]).with_allowlist(["PATH", "HOME"]);
//! let result = runner.run("print('ok')", &ExecOptions::default()).await?;
//! assert!(result.success());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod runner;
pub mod truncate;
pub mod types;

pub use error::{Result, RunnerError};
pub use runner::ScriptRunner;
pub use types::{ExecOptions, ExecResult};
