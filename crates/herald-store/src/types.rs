use chrono::{DateTime, Utc};
use herald_core::TaskId;
use serde::{Deserialize, Serialize};

/// The two task families: scripts run by an interpreter, and topic trackers
/// whose payload is a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Script,
    Topic,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Script => "script",
            TaskKind::Topic => "topic",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "script" => Ok(TaskKind::Script),
            "topic" => Ok(TaskKind::Topic),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

/// When a task fires. Stored JSON-encoded in `tasks.trigger_spec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fire every `every_secs` seconds.
    Interval { every_secs: u64 },

    /// Five-field cron expression: `minute hour day month day_of_week`.
    Cron { expression: String },
}

impl std::fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSpec::Interval { every_secs } => write!(f, "every {every_secs}s"),
            TriggerSpec::Cron { expression } => write!(f, "cron '{expression}'"),
        }
    }
}

/// A persisted task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub kind: TaskKind,
    pub trigger: TriggerSpec,
    /// Opaque to the scheduler: a script body or a search query.
    pub payload: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: TaskKind,
    pub trigger: TriggerSpec,
    pub payload: String,
    #[serde(default)]
    pub is_active: bool,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<TaskKind>,
    pub trigger: Option<TriggerSpec>,
    pub payload: Option<String>,
    pub is_active: Option<bool>,
}

impl TaskUpdate {
    /// Merge this update over `task`. Timestamps are left for the store.
    pub fn apply(&self, task: &Task) -> Task {
        Task {
            id: task.id,
            name: self.name.clone().unwrap_or_else(|| task.name.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| task.description.clone()),
            kind: self.kind.unwrap_or(task.kind),
            trigger: self.trigger.clone().unwrap_or_else(|| task.trigger.clone()),
            payload: self.payload.clone().unwrap_or_else(|| task.payload.clone()),
            is_active: self.is_active.unwrap_or(task.is_active),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Lifecycle state of a run. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One execution record of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub task_id: TaskId,
    pub status: RunStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, when the run leaves `running`.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Terminal state written by [`crate::TaskStore::finish_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn success(output: Option<String>, error: Option<String>) -> Self {
        Self {
            status: RunStatus::Success,
            output,
            error,
        }
    }

    pub fn failed(output: Option<String>, error: Option<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            output,
            error,
        }
    }
}

/// Content produced by one topic-task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResult {
    pub id: i64,
    pub task_id: TaskId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A feed result joined with the name of the task that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: i64,
    pub task_id: TaskId,
    pub task_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_spec_json_shape() {
        let spec = TriggerSpec::Cron {
            expression: "0 9 * * *".to_string(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "cron");
        assert_eq!(json["expression"], "0 9 * * *");

        let interval: TriggerSpec =
            serde_json::from_str(r#"{"kind":"interval","every_secs":3600}"#).unwrap();
        assert_eq!(interval, TriggerSpec::Interval { every_secs: 3600 });
    }

    #[test]
    fn update_keeps_unset_fields() {
        let now = Utc::now();
        let task = Task {
            id: TaskId(1),
            name: "news".into(),
            description: "daily".into(),
            kind: TaskKind::Topic,
            trigger: TriggerSpec::Interval { every_secs: 60 },
            payload: "latest AI news".into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let update = TaskUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        let merged = update.apply(&task);
        assert!(!merged.is_active);
        assert_eq!(merged.name, "news");
        assert_eq!(merged.trigger, TriggerSpec::Interval { every_secs: 60 });
    }

    #[test]
    fn status_parse_round_trip() {
        for s in ["running", "success", "failed"] {
            let status: RunStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("done".parse::<RunStatus>().is_err());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }
}
