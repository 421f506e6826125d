use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use herald_core::TaskId;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::{
    db::init_db,
    error::{Result, StoreError},
    types::{FeedItem, FeedResult, NewTask, Run, RunOutcome, Task, TaskUpdate},
};

const TASK_COLUMNS: &str =
    "id, name, description, kind, trigger_spec, payload, is_active, created_at, updated_at";
const RUN_COLUMNS: &str = "id, task_id, status, output, error, created_at, completed_at";

/// Persistent store for tasks, runs and feed results.
///
/// Cheap to clone; clones share the same connection. Request handlers and
/// job-fire handlers each call into it independently; the mutex serialises
/// them and the guard is dropped on every exit path.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    // A panic while holding the lock cannot leave a half-applied write behind
    // (multi-statement writes are transactional), so a poisoned lock is safe
    // to keep using.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- tasks -------------------------------------------------------------

    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        let conn = self.conn();
        let now = ts(Utc::now());
        let trigger_json = serde_json::to_string(&new.trigger)?;

        conn.execute(
            "INSERT INTO tasks
             (name, description, kind, trigger_spec, payload, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                new.name,
                new.description,
                new.kind.to_string(),
                trigger_json,
                new.payload,
                new.is_active,
                now
            ],
        )?;
        let id = TaskId(conn.last_insert_rowid());
        info!(task_id = %id, name = %new.name, kind = %new.kind, "task created");
        get_task_in(&conn, id)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        get_task_in(&self.conn(), id)
    }

    /// All tasks, oldest first.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id"))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    pub fn list_active_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE is_active = 1 ORDER BY id"
        ))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Apply `update` atomically and refresh `updated_at`.
    pub fn update_task(&self, id: TaskId, update: &TaskUpdate) -> Result<Task> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let merged = update.apply(&get_task_in(&tx, id)?);
        let trigger_json = serde_json::to_string(&merged.trigger)?;
        tx.execute(
            "UPDATE tasks SET name = ?1, description = ?2, kind = ?3, trigger_spec = ?4,
                              payload = ?5, is_active = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                merged.name,
                merged.description,
                merged.kind.to_string(),
                trigger_json,
                merged.payload,
                merged.is_active,
                ts(Utc::now()),
                id.get()
            ],
        )?;
        let task = get_task_in(&tx, id)?;
        tx.commit()?;

        info!(task_id = %id, active = task.is_active, "task updated");
        Ok(task)
    }

    /// Delete a task together with all of its runs and results.
    pub fn delete_task(&self, id: TaskId) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let runs = tx.execute("DELETE FROM runs WHERE task_id = ?1", [id.get()])?;
        let results = tx.execute("DELETE FROM results WHERE task_id = ?1", [id.get()])?;
        let n = tx.execute("DELETE FROM tasks WHERE id = ?1", [id.get()])?;
        if n == 0 {
            // Dropping `tx` rolls back.
            return Err(StoreError::TaskNotFound { id });
        }
        tx.commit()?;

        info!(task_id = %id, runs, results, "task deleted");
        Ok(())
    }

    // --- runs --------------------------------------------------------------

    /// Insert a `running` run for `task_id`, committed before returning.
    pub fn create_run(&self, task_id: TaskId) -> Result<Run> {
        let conn = self.conn();
        let n = conn.execute(
            "INSERT INTO runs (task_id, status, created_at)
             SELECT id, 'running', ?2 FROM tasks WHERE id = ?1",
            params![task_id.get(), ts(Utc::now())],
        )?;
        if n == 0 {
            return Err(StoreError::TaskNotFound { id: task_id });
        }
        let run_id = conn.last_insert_rowid();
        debug!(task_id = %task_id, run_id, "run created");
        get_run_in(&conn, run_id)
    }

    /// Move a run from `running` to its terminal state. Runs that already
    /// left `running` are never touched again.
    pub fn finish_run(&self, run_id: i64, outcome: &RunOutcome) -> Result<Run> {
        if !outcome.status.is_terminal() {
            return Err(StoreError::InvalidTransition(format!(
                "run {run_id} cannot be finished as '{}'",
                outcome.status
            )));
        }

        let conn = self.conn();
        let n = conn.execute(
            "UPDATE runs SET status = ?1, output = ?2, error = ?3, completed_at = ?4
             WHERE id = ?5 AND status = 'running'",
            params![
                outcome.status.to_string(),
                outcome.output,
                outcome.error,
                ts(Utc::now()),
                run_id
            ],
        )?;
        if n == 0 {
            // Distinguish "no such run" from "already finished".
            get_run_in(&conn, run_id)?;
            return Err(StoreError::RunAlreadyFinished { id: run_id });
        }
        get_run_in(&conn, run_id)
    }

    pub fn get_run(&self, run_id: i64) -> Result<Run> {
        get_run_in(&self.conn(), run_id)
    }

    /// Most recent runs of a task, newest first.
    pub fn list_runs(&self, task_id: TaskId, limit: usize) -> Result<Vec<Run>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE task_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let runs = stmt
            .query_map(params![task_id.get(), limit as i64], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    // --- feed results ------------------------------------------------------

    pub fn add_result(&self, task_id: TaskId, content: &str) -> Result<FeedResult> {
        self.add_result_at(task_id, content, Utc::now())
    }

    pub fn add_result_at(
        &self,
        task_id: TaskId,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<FeedResult> {
        let conn = self.conn();
        let n = conn.execute(
            "INSERT INTO results (task_id, content, created_at)
             SELECT id, ?2, ?3 FROM tasks WHERE id = ?1",
            params![task_id.get(), content, ts(created_at)],
        )?;
        if n == 0 {
            return Err(StoreError::TaskNotFound { id: task_id });
        }
        Ok(FeedResult {
            id: conn.last_insert_rowid(),
            task_id,
            content: content.to_string(),
            created_at,
        })
    }

    pub fn get_result(&self, id: i64) -> Result<FeedResult> {
        self.conn()
            .query_row(
                "SELECT id, task_id, content, created_at FROM results WHERE id = ?1",
                [id],
                result_from_row,
            )
            .optional()?
            .ok_or(StoreError::ResultNotFound { id })
    }

    /// Most recent results of a task, newest first.
    pub fn list_results(&self, task_id: TaskId, limit: usize) -> Result<Vec<FeedResult>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, content, created_at FROM results WHERE task_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let results = stmt
            .query_map(params![task_id.get(), limit as i64], result_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// Results created at or after `since`, newest first, joined with their
    /// task name. `task` narrows the feed to a single task.
    pub fn feed_results(
        &self,
        task: Option<TaskId>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FeedItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.task_id, t.name, r.content, r.created_at
             FROM results r JOIN tasks t ON t.id = r.task_id
             WHERE r.created_at >= ?1 AND (?2 IS NULL OR r.task_id = ?2)
             ORDER BY r.created_at DESC, r.id DESC LIMIT ?3",
        )?;
        let items = stmt
            .query_map(
                params![ts(since), task.map(TaskId::get), limit as i64],
                |row| {
                    Ok(FeedItem {
                        id: row.get(0)?,
                        task_id: TaskId(row.get(1)?),
                        task_name: row.get(2)?,
                        content: row.get(3)?,
                        created_at: parse_ts(row, 4)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Delete results created before `older_than`. Returns how many went.
    pub fn prune_results(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let n = self
            .conn()
            .execute("DELETE FROM results WHERE created_at < ?1", [ts(older_than)])?;
        Ok(n)
    }
}

// --- row helpers -----------------------------------------------------------

/// Fixed-width UTC RFC 3339 so that text comparison matches time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e.to_string()))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e.to_string()))
    })
    .transpose()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let kind: String = row.get(3)?;
    let trigger: String = row.get(4)?;
    Ok(Task {
        id: TaskId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        kind: kind.parse().map_err(|e| conversion_err(3, e))?,
        trigger: serde_json::from_str(&trigger).map_err(|e| conversion_err(4, e.to_string()))?,
        payload: row.get(5)?,
        is_active: row.get(6)?,
        created_at: parse_ts(row, 7)?,
        updated_at: parse_ts(row, 8)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(2)?;
    Ok(Run {
        id: row.get(0)?,
        task_id: TaskId(row.get(1)?),
        status: status.parse().map_err(|e| conversion_err(2, e))?,
        output: row.get(3)?,
        error: row.get(4)?,
        created_at: parse_ts(row, 5)?,
        completed_at: parse_opt_ts(row, 6)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<FeedResult> {
    Ok(FeedResult {
        id: row.get(0)?,
        task_id: TaskId(row.get(1)?),
        content: row.get(2)?,
        created_at: parse_ts(row, 3)?,
    })
}

fn get_task_in(conn: &Connection, id: TaskId) -> Result<Task> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        [id.get()],
        task_from_row,
    )
    .optional()?
    .ok_or(StoreError::TaskNotFound { id })
}

fn get_run_in(conn: &Connection, run_id: i64) -> Result<Run> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
        [run_id],
        run_from_row,
    )
    .optional()?
    .ok_or(StoreError::RunNotFound { id: run_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunStatus, TaskKind, TriggerSpec};
    use chrono::Duration;

    fn topic(name: &str, active: bool) -> NewTask {
        NewTask {
            name: name.to_string(),
            description: String::new(),
            kind: TaskKind::Topic,
            trigger: TriggerSpec::Interval { every_secs: 3600 },
            payload: format!("{name} news"),
            is_active: active,
        }
    }

    #[test]
    fn create_get_list() {
        let store = TaskStore::open_in_memory().unwrap();
        let a = store.create_task(&topic("rust", true)).unwrap();
        let b = store.create_task(&topic("go", false)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, a.updated_at);

        let fetched = store.get_task(a.id).unwrap();
        assert_eq!(fetched.name, "rust");
        assert_eq!(fetched.kind, TaskKind::Topic);
        assert_eq!(fetched.trigger, TriggerSpec::Interval { every_secs: 3600 });

        assert_eq!(store.list_tasks().unwrap().len(), 2);
        let active = store.list_active_tasks().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
    }

    #[test]
    fn missing_task_is_not_found() {
        let store = TaskStore::open_in_memory().unwrap();
        assert!(matches!(
            store.get_task(TaskId(99)),
            Err(StoreError::TaskNotFound { id }) if id == TaskId(99)
        ));
        assert!(matches!(
            store.create_run(TaskId(99)),
            Err(StoreError::TaskNotFound { .. })
        ));
        assert!(matches!(
            store.delete_task(TaskId(99)),
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn update_refreshes_timestamp() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = store.create_task(&topic("rust", true)).unwrap();
        let updated = store
            .update_task(
                task.id,
                &TaskUpdate {
                    is_active: Some(false),
                    trigger: Some(TriggerSpec::Cron {
                        expression: "0 9 * * *".into(),
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.name, "rust");
        assert!(updated.updated_at >= task.updated_at);
        assert_eq!(updated.created_at, task.created_at);
        assert!(matches!(updated.trigger, TriggerSpec::Cron { .. }));
    }

    #[test]
    fn run_lifecycle_is_one_way() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = store.create_task(&topic("rust", true)).unwrap();

        let run = store.create_run(task.id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());

        let done = store
            .finish_run(run.id, &RunOutcome::success(Some("ok".into()), None))
            .unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.output.as_deref(), Some("ok"));
        let completed_at = done.completed_at.expect("completed_at set");

        let again = store.finish_run(run.id, &RunOutcome::failed(None, Some("late".into())));
        assert!(matches!(again, Err(StoreError::RunAlreadyFinished { .. })));

        let reread = store.get_run(run.id).unwrap();
        assert_eq!(reread.status, RunStatus::Success);
        assert_eq!(reread.completed_at, Some(completed_at));
    }

    #[test]
    fn finishing_as_running_is_rejected() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = store.create_task(&topic("rust", true)).unwrap();
        let run = store.create_run(task.id).unwrap();
        let outcome = RunOutcome {
            status: RunStatus::Running,
            output: None,
            error: None,
        };
        assert!(matches!(
            store.finish_run(run.id, &outcome),
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            store.finish_run(4242, &RunOutcome::success(None, None)),
            Err(StoreError::RunNotFound { .. })
        ));
    }

    #[test]
    fn runs_listed_newest_first_with_limit() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = store.create_task(&topic("rust", true)).unwrap();
        let ids: Vec<i64> = (0..5).map(|_| store.create_run(task.id).unwrap().id).collect();

        let runs = store.list_runs(task.id, 3).unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].id, ids[4]);
        assert_eq!(runs[2].id, ids[2]);
    }

    #[test]
    fn feed_window_and_prune() {
        let store = TaskStore::open_in_memory().unwrap();
        let rust = store.create_task(&topic("rust", true)).unwrap();
        let go = store.create_task(&topic("go", true)).unwrap();
        let now = Utc::now();

        store
            .add_result_at(rust.id, "old", now - Duration::days(10))
            .unwrap();
        store
            .add_result_at(rust.id, "recent", now - Duration::hours(1))
            .unwrap();
        store.add_result_at(go.id, "newest", now).unwrap();

        let all = store.feed_results(None, now - Duration::days(7), 50).unwrap();
        assert_eq!(
            all.iter().map(|i| i.content.as_str()).collect::<Vec<_>>(),
            vec!["newest", "recent"]
        );
        assert_eq!(all[0].task_name, "go");

        let only_rust = store
            .feed_results(Some(rust.id), now - Duration::days(30), 50)
            .unwrap();
        assert_eq!(only_rust.len(), 2);

        let pruned = store.prune_results(now - Duration::days(2)).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.list_results(rust.id, 50).unwrap().len(), 1);
    }
}
