use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use herald_core::config::HeraldConfig;
use herald_core::TaskId;
use herald_notify::{BarkNotifier, Notification, Notifier};
use herald_runner::{ExecOptions, RunnerError, ScriptRunner};
use herald_search::{search_or_none, GeminiSearch, SearchProvider};
use herald_store::{Run, RunOutcome, Task, TaskKind, TaskStore};

use crate::engine::JobDispatcher;
use crate::error::Result;

pub const TIMEOUT_MESSAGE: &str = "Script execution timeout";
pub const NO_CONTENT_MESSAGE: &str = "search produced no content";

/// Push notification characters kept from a topic result.
const PUSH_BODY_CHARS: usize = 500;

/// Where topic results are pushed.
pub struct NotifyTarget {
    pub notifier: Arc<dyn Notifier>,
    pub device_key: String,
    /// Base URL used to link a push back to the stored result.
    pub link_base: Option<String>,
}

/// Runs one task to completion and records the Run.
pub struct Executor {
    store: TaskStore,
    runner: ScriptRunner,
    options: ExecOptions,
    search: Arc<dyn SearchProvider>,
    notify: Option<NotifyTarget>,
}

impl Executor {
    pub fn new(
        store: TaskStore,
        runner: ScriptRunner,
        options: ExecOptions,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            store,
            runner,
            options,
            search,
            notify: None,
        }
    }

    pub fn with_notify(mut self, target: NotifyTarget) -> Self {
        self.notify = Some(target);
        self
    }

    /// Wire the production collaborators from configuration.
    pub fn from_config(cfg: &HeraldConfig, store: TaskStore) -> Self {
        let mut runner = ScriptRunner::new(
            cfg.runner.interpreter.clone(),
            cfg.runner.interpreter_args.iter().cloned(),
        )
        .with_allowlist(cfg.runner.env_allowlist.iter().cloned());

        // Configured credentials reach scripts under their conventional names.
        let credentials = [
            ("GEMINI_API_KEY", cfg.search.api_key.as_ref()),
            ("BARK_DEVICE_KEY", cfg.notify.device_key.as_ref()),
            ("BARK_API_SERVER", cfg.notify.server.as_ref()),
        ];
        for (name, value) in credentials {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                runner = runner.with_env(name, v.clone());
            }
        }
        if let Some(dir) = &cfg.runner.workdir {
            runner = runner.with_workdir(dir);
        }

        let options = ExecOptions {
            timeout: Duration::from_secs(cfg.runner.timeout_secs),
            max_output_chars: cfg.runner.max_output_chars,
        };
        let search: Arc<dyn SearchProvider> = Arc::new(GeminiSearch::from_config(&cfg.search));
        let executor = Self::new(store, runner, options, search);

        match cfg.notify.device_key.as_ref().filter(|k| !k.is_empty()) {
            Some(key) if cfg.notify.push_topic_results => executor.with_notify(NotifyTarget {
                notifier: Arc::new(BarkNotifier::from_config(&cfg.notify)),
                device_key: key.clone(),
                link_base: Some(cfg.feed.host.clone()),
            }),
            _ => executor,
        }
    }

    /// Execute `task_id` now and return its finished Run.
    ///
    /// The Run is created (and committed) before the payload starts, and
    /// finished exactly once afterwards.
    pub async fn execute(&self, task_id: TaskId) -> Result<Run> {
        let task = self.store.get_task(task_id)?;
        let run = self.store.create_run(task.id)?;
        info!(task_id = %task.id, run_id = run.id, kind = %task.kind, "run started");

        let outcome = match task.kind {
            TaskKind::Script => self.run_script(&task).await,
            TaskKind::Topic => self.run_topic(&task).await,
        };

        let run = self.store.finish_run(run.id, &outcome)?;
        info!(task_id = %task.id, run_id = run.id, status = %run.status, "run finished");
        Ok(run)
    }

    async fn run_script(&self, task: &Task) -> RunOutcome {
        match self.runner.run(&task.payload, &self.options).await {
            Ok(res) => {
                let output = non_empty(res.stdout);
                let stderr = non_empty(res.stderr);
                if res.exit_code == 0 {
                    RunOutcome::success(output, stderr)
                } else {
                    warn!(task_id = %task.id, exit_code = res.exit_code, "script exited with failure");
                    RunOutcome::failed(output, stderr)
                }
            }
            Err(RunnerError::Timeout { secs }) => {
                warn!(task_id = %task.id, timeout_secs = secs, "script timed out");
                RunOutcome::failed(None, Some(TIMEOUT_MESSAGE.to_string()))
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "script could not run");
                RunOutcome::failed(None, Some(e.to_string()))
            }
        }
    }

    async fn run_topic(&self, task: &Task) -> RunOutcome {
        let Some(content) = search_or_none(self.search.as_ref(), &task.payload).await else {
            return RunOutcome::failed(None, Some(NO_CONTENT_MESSAGE.to_string()));
        };

        let result = match self.store.add_result(task.id, &content) {
            Ok(r) => r,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "failed to store topic result");
                return RunOutcome::failed(Some(content), Some(e.to_string()));
            }
        };
        info!(task_id = %task.id, result_id = result.id, chars = content.len(), "topic result stored");

        if let Some(target) = &self.notify {
            let body: String = content.chars().take(PUSH_BODY_CHARS).collect();
            let mut note = Notification::new(body).title(task.name.clone()).group("herald");
            if let Some(base) = &target.link_base {
                note = note.url(format!("{}/result/{}", base.trim_end_matches('/'), result.id));
            }
            let sent = target.notifier.send(&target.device_key, &note).await;
            if !sent.success {
                warn!(task_id = %task.id, notifier = target.notifier.name(), "topic push not delivered");
            }
        }

        RunOutcome::success(Some(content), None)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[async_trait]
impl JobDispatcher for Executor {
    async fn fire(&self, task_id: TaskId) {
        if let Err(e) = self.execute(task_id).await {
            error!(task_id = %task_id, error = %e, "scheduled run failed");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use herald_notify::NotifyOutcome;
    use herald_search::SearchError;
    use herald_store::{NewTask, RunStatus, TriggerSpec};
    use std::sync::Mutex;

    struct FixedSearch(Option<&'static str>);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn search(&self, _query: &str) -> herald_search::Result<String> {
            self.0.map(str::to_string).ok_or(SearchError::NoContent)
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(String, Notification)>>);

    #[async_trait]
    impl Notifier for Outbox {
        fn name(&self) -> &str {
            "outbox"
        }

        async fn send(&self, key: &str, n: &Notification) -> NotifyOutcome {
            self.0.lock().unwrap().push((key.to_string(), n.clone()));
            NotifyOutcome {
                success: true,
                response: serde_json::json!({"code": 200}),
            }
        }
    }

    fn executor(store: &TaskStore, timeout_ms: u64, answer: Option<&'static str>) -> Executor {
        Executor::new(
            store.clone(),
            ScriptRunner::new("/bin/sh", ["-c"]),
            ExecOptions {
                timeout: Duration::from_millis(timeout_ms),
                max_output_chars: 10_000,
            },
            Arc::new(FixedSearch(answer)),
        )
    }

    fn task(store: &TaskStore, kind: TaskKind, payload: &str) -> TaskId {
        store
            .create_task(&NewTask {
                name: "t".into(),
                description: String::new(),
                kind,
                trigger: TriggerSpec::Interval { every_secs: 60 },
                payload: payload.into(),
                is_active: true,
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn script_success_captures_output() {
        let store = TaskStore::open_in_memory().unwrap();
        let id = task(&store, TaskKind::Script, "echo ok");
        let run = executor(&store, 5_000, None).execute(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.output.as_deref(), Some("ok\n"));
        assert!(run.error.is_none());
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn script_failure_keeps_stderr() {
        let store = TaskStore::open_in_memory().unwrap();
        let id = task(&store, TaskKind::Script, "echo partial; echo broken >&2; exit 1");
        let run = executor(&store, 5_000, None).execute(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.output.as_deref(), Some("partial\n"));
        assert_eq!(run.error.as_deref(), Some("broken\n"));
    }

    #[tokio::test]
    async fn script_timeout() {
        let store = TaskStore::open_in_memory().unwrap();
        let id = task(&store, TaskKind::Script, "sleep 30");
        let run = executor(&store, 200, None).execute(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some(TIMEOUT_MESSAGE));
        assert!(run.completed_at.is_some());

        let runs = store.list_runs(id, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn launch_error_recorded() {
        let store = TaskStore::open_in_memory().unwrap();
        let id = task(&store, TaskKind::Script, "print(1)");
        let exec = Executor::new(
            store.clone(),
            ScriptRunner::new("/nonexistent/python", ["-c"]),
            ExecOptions::default(),
            Arc::new(FixedSearch(None)),
        );
        let run = exec.execute(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("/nonexistent/python"));
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let store = TaskStore::open_in_memory().unwrap();
        let err = executor(&store, 1_000, None).execute(TaskId(99)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound { task_id } if task_id == TaskId(99)));
        assert!(store.list_runs(TaskId(99), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn topic_result_stored_and_pushed() {
        let store = TaskStore::open_in_memory().unwrap();
        let id = task(&store, TaskKind::Topic, "rust release notes");
        let outbox = Arc::new(Outbox::default());
        let exec = executor(&store, 1_000, Some("Rust 1.90 shipped.")).with_notify(NotifyTarget {
            notifier: outbox.clone(),
            device_key: "dev".into(),
            link_base: Some("http://feeds.local/".into()),
        });

        let run = exec.execute(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.output.as_deref(), Some("Rust 1.90 shipped."));

        let results = store.list_results(id, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "Rust 1.90 shipped.");

        let sent = outbox.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "dev");
        assert_eq!(
            sent[0].1.url.as_deref(),
            Some(format!("http://feeds.local/result/{}", results[0].id).as_str())
        );
    }

    #[tokio::test]
    async fn topic_without_content_fails() {
        let store = TaskStore::open_in_memory().unwrap();
        let id = task(&store, TaskKind::Topic, "anything");
        let run = executor(&store, 1_000, None).execute(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some(NO_CONTENT_MESSAGE));
        assert!(store.list_results(id, 10).unwrap().is_empty());
    }
}
