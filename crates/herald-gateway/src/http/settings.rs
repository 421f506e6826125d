use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
pub struct ConfigStatus {
    pub database_location: String,
    pub timezone: String,
    pub runner_interpreter: String,
    pub retention_days: u32,
    pub feed_host: String,
    /// Credential name → whether it is set. Values are never exposed.
    pub credentials: Vec<CredentialStatus>,
    pub notify_server: Option<String>,
}

#[derive(Serialize)]
pub struct CredentialStatus {
    pub name: &'static str,
    pub set: bool,
}

fn is_set(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// GET /api/config: where data lives and which credentials are configured.
pub async fn config_handler(State(state): State<Arc<AppState>>) -> Json<ConfigStatus> {
    let cfg = &state.config;
    let database_location = std::fs::canonicalize(&cfg.database.path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| cfg.database.path.clone());

    Json(ConfigStatus {
        database_location,
        timezone: state.tz.name().to_string(),
        runner_interpreter: cfg.runner.interpreter.clone(),
        retention_days: cfg.retention.days,
        feed_host: cfg.feed.host.clone(),
        credentials: vec![
            CredentialStatus {
                name: "GEMINI_API_KEY",
                set: is_set(&cfg.search.api_key),
            },
            CredentialStatus {
                name: "BARK_DEVICE_KEY",
                set: is_set(&cfg.notify.device_key),
            },
        ],
        notify_server: cfg.notify.server.clone(),
    })
}
