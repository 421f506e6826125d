use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timezone": state.tz.name(),
        "scheduled_jobs": state.registry.len(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::app::test_support::{send_json, state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_reports_ok() {
        let st = state();
        let (status, body) = send_json(&st, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduled_jobs"], 0);
    }
}
