use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use herald_scheduler::{describe, CronPreview};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct CronRequest {
    #[serde(default)]
    pub cron_expression: String,
}

/// POST /api/cron/parse: describe a cron line and preview its next fire.
pub async fn parse_cron(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CronRequest>,
) -> Json<CronPreview> {
    Json(describe(&req.cron_expression, state.tz, Utc::now()))
}
