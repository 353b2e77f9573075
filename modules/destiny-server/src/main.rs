//! Server binary: boots the robot-facing HTTP surface (spec §6) and every
//! background loop — dedup, projection rebuild, orchestrator finalization,
//! automation dispatch — as tasks under one process. Grounded on the
//! teacher's multi-listener `main.rs`: separate http/worker pools against
//! the same database, migrations run once up front, everything else spawned
//! and raced with `tokio::select!`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Duration;
use destiny_blob::BlobGateway;
use destiny_common::Config;
use destiny_dedup::{DedupDeps, DedupEngine};
use destiny_dispatcher::Dispatcher;
use destiny_events::EventStore;
use destiny_orchestrator::http::{self, AppState};
use destiny_orchestrator::{OrchestratorDeps, OrchestratorEngine};
use destiny_projection::ProjectionBuilder;
use destiny_store::{RelationalStore, SearchIndex};
use destiny_taskbus::TaskBus;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = Config::server_from_env();
    config.log_redacted();
    tracing::info!("starting destiny-server");

    let http_pool = PgPoolOptions::new().max_connections(20).connect(&config.database_url).await?;
    let worker_pool = PgPoolOptions::new().max_connections(8).connect(&config.database_url).await?;

    let store = RelationalStore::new(http_pool.clone());
    store.migrate().await?;
    let events = EventStore::new(http_pool.clone());
    events.migrate().await?;
    let taskbus = TaskBus::new(http_pool.clone());
    taskbus.migrate().await?;

    let search = SearchIndex::new(&config.search_url).await?;
    let blob = BlobGateway::new(config.blob_bucket.clone(), config.blob_region.clone(), config.presign_ttl_secs).await?;

    let orchestrator_deps = OrchestratorDeps {
        store: store.clone(),
        search: search.clone(),
        blob: blob.clone(),
        taskbus: taskbus.clone(),
        pool: http_pool.clone(),
        replay_window_secs: config.robot_auth_replay_window_secs,
    };
    orchestrator_deps.migrate().await?;

    let orchestrator_engine = OrchestratorEngine::new(events.clone(), orchestrator_deps, run_id());
    let app_state = Arc::new(AppState { engine: orchestrator_engine });
    let router = http::router(app_state.clone());

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "robot-facing HTTP surface listening");
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "http server exited");
        }
    });

    let dedup_deps = DedupDeps { store: store.clone(), search: search.clone(), taskbus: taskbus.clone(), config: config.dedup.clone() };
    let dedup_engine = Arc::new(DedupEngine::new(events.clone(), dedup_deps, run_id()));
    let dedup_handle = tokio::spawn({
        let bus = worker_taskbus(&worker_pool);
        let engine = dedup_engine.clone();
        async move {
            loop {
                let processed = destiny_dedup::worker::run_once(&bus, &engine, "destiny-server-dedup", Duration::minutes(5), 10).await;
                if processed == 0 {
                    tokio::time::sleep(StdDuration::from_secs(2)).await;
                }
            }
        }
    });

    let projection_builder = Arc::new(ProjectionBuilder::new(store.clone(), search.clone()));
    let projection_handle = tokio::spawn({
        let bus = worker_taskbus(&worker_pool);
        let builder = projection_builder.clone();
        async move {
            loop {
                let processed = destiny_projection::worker::run_once(&bus, &builder, "destiny-server-projection", Duration::minutes(5), 10).await;
                if processed == 0 {
                    tokio::time::sleep(StdDuration::from_secs(2)).await;
                }
            }
        }
    });

    let orchestrator_sweep_handle = tokio::spawn({
        let app_state = app_state.clone();
        async move {
            loop {
                destiny_orchestrator::worker::run_once(&app_state.engine).await;
                tokio::time::sleep(StdDuration::from_secs(5)).await;
            }
        }
    });

    let dispatcher = Arc::new(Dispatcher::new(store.clone(), worker_taskbus(&worker_pool)));
    let dispatcher_ingest_handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            loop {
                let processed = dispatcher.ingest_once(Duration::minutes(5), 50).await;
                if processed == 0 {
                    tokio::time::sleep(StdDuration::from_secs(2)).await;
                }
            }
        }
    });
    let dispatcher_flush_handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let window = StdDuration::from_secs(config.automation_window_secs);
        async move {
            let mut interval = tokio::time::interval(window);
            loop {
                interval.tick().await;
                if let Err(e) = dispatcher.flush().await {
                    tracing::error!(error = %e, "automation dispatcher flush failed");
                }
            }
        }
    });

    tokio::select! {
        res = http_handle => { tracing::error!(?res, "http server task ended"); }
        res = dedup_handle => { tracing::error!(?res, "dedup worker task ended"); }
        res = projection_handle => { tracing::error!(?res, "projection worker task ended"); }
        res = orchestrator_sweep_handle => { tracing::error!(?res, "orchestrator sweep task ended"); }
        res = dispatcher_ingest_handle => { tracing::error!(?res, "dispatcher ingest task ended"); }
        res = dispatcher_flush_handle => { tracing::error!(?res, "dispatcher flush task ended"); }
    }

    Ok(())
}

fn worker_taskbus(pool: &sqlx::PgPool) -> TaskBus {
    TaskBus::new(pool.clone())
}

fn run_id() -> String {
    Uuid::new_v4().to_string()
}
