use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};
use crate::truncate::cap_output;
use crate::types::{ExecOptions, ExecResult};

/// Launches payloads under a fixed interpreter invocation.
///
/// Each call to [`ScriptRunner::run`] spawns `interpreter [args..] <payload>`
/// with a cleared environment. Only variables named in the allow-list (copied
/// from the host at run time) and explicit [`ScriptRunner::with_env`] values
/// reach the child; explicit values win over host values of the same name.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: String,
    args: Vec<String>,
    allowlist: Vec<String>,
    env: Vec<(String, String)>,
    workdir: Option<PathBuf>,
}

impl ScriptRunner {
    pub fn new<I, S>(interpreter: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            interpreter: interpreter.into(),
            args: args.into_iter().map(Into::into).collect(),
            allowlist: Vec::new(),
            env: Vec::new(),
            workdir: None,
        }
    }

    /// Host variables the child may inherit.
    pub fn with_allowlist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist.extend(names.into_iter().map(Into::into));
        self
    }

    /// Pass `key=value` to the child regardless of the host environment.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    fn child_env(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .allowlist
            .iter()
            .filter(|name| !self.env.iter().any(|(k, _)| k == *name))
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v)))
            .collect();
        vars.extend(self.env.iter().cloned());
        vars
    }

    /// Run `payload` to completion or until `options.timeout` elapses.
    ///
    /// A non-zero exit is still `Ok`; callers decide what failure means.
    ///
    /// # Errors
    /// - `Spawn`: the interpreter could not be launched.
    /// - `Timeout`: the deadline passed; the child's process group was killed.
    /// - `Io` / `WaitAborted`: output collection failed.
    pub async fn run(&self, payload: &str, options: &ExecOptions) -> Result<ExecResult> {
        debug!(
            interpreter = %self.interpreter,
            payload_len = payload.len(),
            "launching payload"
        );

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.args)
            .arg(payload)
            .env_clear()
            .envs(self.child_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        // Own process group, so a timeout also takes down anything the
        // payload forked.
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;

        // wait_with_output consumes the child; keep the pid for the kill path.
        let pid = child.id();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(child.wait_with_output().await);
        });

        match tokio::time::timeout(options.timeout, rx).await {
            Ok(Ok(Ok(output))) => {
                let exit_code = output.status.code().unwrap_or(-1);
                Ok(ExecResult {
                    exit_code,
                    stdout: cap_output(
                        &String::from_utf8_lossy(&output.stdout),
                        options.max_output_chars,
                    ),
                    stderr: cap_output(
                        &String::from_utf8_lossy(&output.stderr),
                        options.max_output_chars,
                    ),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Ok(Err(e))) => Err(RunnerError::Io(e)),
            Ok(Err(_)) => Err(RunnerError::WaitAborted),
            Err(_) => {
                if let Some(raw_pid) = pid {
                    warn!(pid = raw_pid, timeout = ?options.timeout, "payload timed out, killing");
                    kill_group(raw_pid);
                }
                Err(RunnerError::Timeout {
                    secs: options.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    // The child is its own group leader (process_group(0)), so -pid names the
    // whole group.
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output();
}
