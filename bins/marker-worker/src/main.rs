mod catalog;
mod engine;
mod evaluator;
mod executor;
mod handlers;
mod routes;
mod sink;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::Router;
use marker_common::{Config, EngineKind};
use marker_scheduler::{metrics, LogSink, PoolConfig, ResultSink, Runner, Scheduler};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::catalog::AssessmentCatalog;
use crate::engine::{DockerEngine, DummyEngine, ExecutionEngine};
use crate::executor::EngineRunner;
use crate::sink::RedisResultSink;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub start_time: Instant,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Marker worker booting...");

    let config = Config::from_env();
    config.validate()?;
    let addr = config.socket_addr()?;

    metrics::init_metrics();

    let catalog = AssessmentCatalog::load_from_file(&config.assessments_path)?;
    info!(
        path = %config.assessments_path.display(),
        assessments = catalog.len(),
        "Loaded assessment catalog"
    );

    let engine: Arc<dyn ExecutionEngine> = match config.engine {
        EngineKind::Docker => Arc::new(DockerEngine::connect()?),
        EngineKind::Dummy => {
            warn!("Using dummy engine; submissions are echoed, not executed");
            Arc::new(DummyEngine::new())
        }
    };
    let runner: Arc<dyn Runner> = Arc::new(EngineRunner::new(engine, Arc::new(catalog)));

    let sink: Arc<dyn ResultSink> = match &config.redis_url {
        Some(url) => {
            let sink = RedisResultSink::connect(url, config.result_ttl_secs).await?;
            info!(redis_url = %url, ttl_secs = config.result_ttl_secs, "Storing results in Redis");
            Arc::new(sink)
        }
        None => {
            warn!("REDIS_URL not set; results are only logged");
            Arc::new(LogSink)
        }
    };

    let scheduler = Scheduler::start_with_refresher(
        PoolConfig::from(&config),
        runner,
        sink,
        executor::refresh_submission,
    )?;

    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
        start_time: Instant::now(),
    });
    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let abandoned = scheduler.shutdown().await;
    info!(abandoned, "Worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, finishing running jobs...");
}
