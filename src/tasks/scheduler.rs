use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::AppState;
use crate::services::pending_results::PendingResults;
use crate::services::result_sink::ResultSink;
use crate::services::session_registry::SessionRegistry;

/// Spawns the engine's background loops. Each exits when `shutdown` flips to true.
pub(crate) fn spawn(
    state: &AppState,
    sink: Arc<dyn ResultSink>,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let engine = state.settings().engine();
    vec![
        tokio::spawn(tick_loop(state.registry().clone(), engine.tick_interval(), shutdown.clone())),
        tokio::spawn(pending_retry_loop(
            state.registry().clone(),
            state.pending().clone(),
            sink,
            Duration::from_secs(engine.pending_retry_interval_seconds),
            engine.pending_retry_batch,
            shutdown.clone(),
        )),
        tokio::spawn(eviction_loop(
            state.registry().clone(),
            Duration::from_secs(engine.eviction_interval_seconds),
            engine.session_retention_ms(),
            shutdown.clone(),
        )),
    ]
}

pub(crate) async fn join(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }
}

async fn tick_loop(
    registry: SessionRegistry,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    // A stalled runtime must not replay a burst of ticks; the timer reads the deadline.
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let summary = registry.tick_all().await;
                if summary.submitted > 0 {
                    tracing::info!(submitted = summary.submitted, "Forced submissions on tick");
                }
            }
        }
    }
}

async fn pending_retry_loop(
    registry: SessionRegistry,
    pending: PendingResults,
    sink: Arc<dyn ResultSink>,
    period: Duration,
    batch: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let handed_off = registry.retry_pending_handoffs().await;
                let report = pending.retry(sink.as_ref(), batch).await;
                if handed_off > 0 || report.delivered > 0 {
                    tracing::info!(
                        handed_off,
                        delivered = report.delivered,
                        more = report.remaining,
                        "Pending results retried"
                    );
                }
            }
        }
    }
}

async fn eviction_loop(
    registry: SessionRegistry,
    period: Duration,
    retention_ms: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                registry.evict_stale(retention_ms).await;
            }
        }
    }
}
