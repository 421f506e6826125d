use axum::{
    routing::{get, post},
    Router,
};
use chrono_tz::Tz;
use std::sync::Arc;

use herald_core::config::HeraldConfig;
use herald_scheduler::{Executor, JobRegistry};
use herald_store::TaskStore;

use crate::feed::FeedRenderer;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: HeraldConfig,
    /// Scheduling timezone, used for every time shown to users.
    pub tz: Tz,
    pub store: TaskStore,
    pub registry: Arc<JobRegistry>,
    /// Held across "write the task, then sync its live job" so concurrent
    /// writes reach the store and the registry in the same order.
    pub task_writes: tokio::sync::Mutex<()>,
    /// Shared with the engine; manual runs go through the same code path.
    pub executor: Arc<Executor>,
    pub feed: FeedRenderer,
}

impl AppState {
    pub fn new(
        config: HeraldConfig,
        store: TaskStore,
        registry: Arc<JobRegistry>,
        executor: Arc<Executor>,
    ) -> anyhow::Result<Self> {
        let tz = registry.context().tz;
        let feed = FeedRenderer::new(&config.feed.host, tz)?;
        Ok(Self {
            config,
            tz,
            store,
            registry,
            task_writes: tokio::sync::Mutex::new(()),
            executor,
            feed,
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{cron, feed, health, settings, tasks, templates};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/api/tasks/{id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/api/tasks/{id}/run", post(tasks::run_task))
        .route("/api/tasks/{id}/runs", get(tasks::list_runs))
        .route("/api/tasks/{id}/results", get(tasks::list_results))
        .route("/api/cron/parse", post(cron::parse_cron))
        .route("/api/templates", get(templates::list_templates))
        .route("/api/config", get(settings::config_handler))
        .route("/rss", get(feed::rss_all))
        .route("/rss/{id}", get(feed::rss_for_task))
        .route("/result/{id}", get(feed::result_page))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
