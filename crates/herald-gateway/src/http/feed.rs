use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;

use herald_core::TaskId;
use herald_scheduler::format_local;
use herald_store::FeedResult;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::feed::Channel;

const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";

fn render(state: &AppState, channel: Channel, task: Option<TaskId>) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let since = now - TimeDelta::days(i64::from(state.config.feed.window_days));
    let items = state
        .store
        .feed_results(task, since, state.config.feed.limit)?;
    let xml = state
        .feed
        .render(&channel, &items, now)
        .map_err(|e| ApiError::internal(format!("feed rendering failed: {e}")))?;
    Ok(([(header::CONTENT_TYPE, RSS_CONTENT_TYPE)], xml))
}

/// GET /rss: recent results of every topic task.
pub async fn rss_all(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let cfg = &state.config.feed;
    let channel = Channel {
        title: cfg.title.clone(),
        description: cfg.description.clone(),
        link: format!("{}/rss", state.feed.host()),
    };
    render(&state, channel, None)
}

/// GET /rss/{id}: recent results of one task.
pub async fn rss_for_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let task = state.store.get_task(TaskId(id))?;
    let channel = Channel {
        title: format!("{} - {}", task.name, state.config.feed.title),
        description: format!("Latest results for {}", task.name),
        link: format!("{}/rss/{}", state.feed.host(), task.id),
    };
    render(&state, channel, Some(task.id))
}

#[derive(Serialize)]
pub struct ResultView {
    #[serde(flatten)]
    pub result: FeedResult,
    pub task_name: String,
    pub created_at_local: String,
}

/// GET /result/{id}: one stored result, the target of feed item links.
pub async fn result_page(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ResultView>> {
    let result = state.store.get_result(id)?;
    let task = state.store.get_task(result.task_id)?;
    Ok(Json(ResultView {
        created_at_local: format_local(result.created_at, state.tz),
        task_name: task.name,
        result,
    }))
}
