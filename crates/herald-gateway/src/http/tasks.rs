//! Task management: CRUD, manual runs and per-task history.
//!
//! Every write validates the resulting trigger before anything is persisted,
//! then brings the live job registry in line with the stored task.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use herald_core::TaskId;
use herald_scheduler::{format_local, Trigger};
use herald_store::{FeedResult, NewTask, Run, Task, TaskUpdate, TriggerSpec};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

const RUN_HISTORY_LIMIT: usize = 20;
const RESULT_HISTORY_LIMIT: usize = 50;

/// A task as returned by the API, with its next scheduled fire.
#[derive(Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    /// `YYYY-MM-DD HH:MM:SS` in the scheduling timezone; null when the task
    /// is not scheduled.
    pub next_run_time: Option<String>,
}

fn view(state: &AppState, task: Task) -> TaskView {
    let next_run_time = state
        .registry
        .next_fire_time(task.id)
        .map(|t| format_local(t, state.tz));
    TaskView {
        task,
        next_run_time,
    }
}

fn validate(state: &AppState, name: &str, trigger: &TriggerSpec) -> ApiResult<()> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("task name must not be empty"));
    }
    Trigger::compile(trigger, state.registry.context(), Utc::now())?;
    Ok(())
}

/// GET /api/tasks
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TaskView>>> {
    let tasks = state.store.list_tasks()?;
    Ok(Json(tasks.into_iter().map(|t| view(&state, t)).collect()))
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<TaskView>)> {
    validate(&state, &new.name, &new.trigger)?;

    let _writes = state.task_writes.lock().await;
    let task = state.store.create_task(&new)?;
    state.registry.sync(&task)?;
    info!(task_id = %task.id, name = %task.name, kind = %task.kind, "task created");
    Ok((StatusCode::CREATED, Json(view(&state, task))))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TaskView>> {
    let task = state.store.get_task(TaskId(id))?;
    Ok(Json(view(&state, task)))
}

/// PUT /api/tasks/{id}
///
/// A rejected update leaves both the stored task and its live job as they
/// were.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(update): Json<TaskUpdate>,
) -> ApiResult<Json<TaskView>> {
    let _writes = state.task_writes.lock().await;
    let current = state.store.get_task(TaskId(id))?;
    let merged = update.apply(&current);
    validate(&state, &merged.name, &merged.trigger)?;

    let task = state.store.update_task(current.id, &update)?;
    state.registry.sync(&task)?;
    info!(task_id = %task.id, active = task.is_active, "task updated");
    Ok(Json(view(&state, task)))
}

/// DELETE /api/tasks/{id}
///
/// The live job goes first, so nothing can fire for a row that is gone.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let _writes = state.task_writes.lock().await;
    let task = state.store.get_task(TaskId(id))?;
    let id = task.id;
    state.registry.remove(id);
    if let Err(e) = state.store.delete_task(id) {
        // The row survived; give it its job back.
        if let Err(resync) = state.registry.sync(&task) {
            warn!(task_id = %id, error = %resync, "could not restore live job");
        }
        return Err(e.into());
    }
    info!(task_id = %id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tasks/{id}/run: execute now and wait for the finished Run.
pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Run>> {
    let run = state.executor.execute(TaskId(id)).await?;
    Ok(Json(run))
}

/// GET /api/tasks/{id}/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Run>>> {
    let task = state.store.get_task(TaskId(id))?;
    Ok(Json(state.store.list_runs(task.id, RUN_HISTORY_LIMIT)?))
}

/// GET /api/tasks/{id}/results
pub async fn list_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<FeedResult>>> {
    let task = state.store.get_task(TaskId(id))?;
    Ok(Json(state.store.list_results(task.id, RESULT_HISTORY_LIMIT)?))
}
