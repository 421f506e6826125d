use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::TimeDelta;
use clap::Parser;
use tracing::{info, warn};

use herald_core::config::HeraldConfig;
use herald_scheduler::{reconcile, Executor, JobRegistry, SchedulerEngine, TriggerContext};
use herald_store::TaskStore;

mod app;
mod error;
mod feed;
mod housekeeping;
mod http;

#[derive(Parser)]
#[command(name = "herald-gateway", version, about = "Scheduled scripts and topic feeds over HTTP")]
struct Cli {
    /// Config file (default: $HERALD_CONFIG, then ~/.herald/herald.toml).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herald_gateway=info,herald_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = HeraldConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = TaskStore::open(&db_path).context("opening task store")?;

    let ctx = TriggerContext::from_config(&config.scheduler)?;
    info!(timezone = %ctx.tz, "scheduling timezone");
    let registry = Arc::new(JobRegistry::new(ctx));
    let executor = Arc::new(Executor::from_config(&config, store.clone()));

    // Live jobs exist before the engine takes its first tick.
    let report = reconcile(&store, &registry)?;
    if report.failed > 0 {
        warn!(failed = report.failed, "some active tasks could not be scheduled");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine = SchedulerEngine::new(
        registry.clone(),
        executor.clone(),
        config.scheduler.workers,
        TimeDelta::seconds(config.scheduler.misfire_grace_secs as i64),
    );
    tokio::spawn(engine.run(shutdown_rx.clone()));
    tokio::spawn(housekeeping::run(
        store.clone(),
        config.retention.days,
        shutdown_rx,
    ));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, store, registry, executor)?);
    let router = app::build_router(state);

    info!("Herald gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    info!("Herald gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
