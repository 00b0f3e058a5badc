pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod engine;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::shutdown::{self, Shutdown};
use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::engine::clock::SystemClock;
use crate::services::exam_loader::PgExamLoader;
use crate::services::result_sink::{PgResultSink, ResultSink};
use crate::services::session_registry::SessionRegistry;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; pending results stay in memory");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let (handoff, results) = tasks::dispatch::channel();
    let loader = Arc::new(PgExamLoader::new(
        db_pool.clone(),
        settings.engine().default_max_violations,
    ));
    let sink: Arc<dyn ResultSink> = Arc::new(PgResultSink::new(db_pool.clone()));
    let registry =
        SessionRegistry::new(loader, sink.clone(), Arc::new(SystemClock), Arc::new(handoff));
    let state = AppState::new(settings, db_pool, redis.clone(), registry);

    let shutdown = Shutdown::new();
    let dispatcher = tokio::spawn(tasks::dispatch::run(
        results,
        sink.clone(),
        state.pending().clone(),
        shutdown.subscribe(),
    ));
    let background = tasks::scheduler::spawn(&state, sink, &shutdown.subscribe());
    let signals = tokio::spawn(shutdown.clone().wait_for_signal());

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        tick_interval_ms = state.settings().engine().tick_interval_ms,
        "Examflow API listening"
    );

    let mut server_shutdown = shutdown.subscribe();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown::wait(&mut server_shutdown).await })
        .await;

    if !shutdown.is_triggered() {
        tracing::warn!("Server stopped without a shutdown signal");
    }
    shutdown.trigger();
    signals.abort();
    tasks::scheduler::join(background).await;
    if let Err(err) = dispatcher.await {
        tracing::error!(error = %err, "Result dispatcher join failed");
    }
    tracing::info!(live_sessions = state.registry().len().await, "Background tasks stopped");

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
