use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::metrics::RESULTS_PENDING;
use crate::core::redis::RedisHandle;
use crate::engine::session::AttemptResult;
use crate::services::result_sink::ResultSink;

pub(crate) const PENDING_RESULTS_KEY: &str = "examflow:pending_results";

/// Results that the sink refused, waiting for another try.
///
/// Redis keeps them across restarts. While Redis is unreachable they are held in memory.
#[derive(Clone)]
pub(crate) struct PendingResults {
    redis: RedisHandle,
    key: Arc<str>,
    local: Arc<Mutex<VecDeque<AttemptResult>>>,
}

/// Where a result was taken from; a failed retry returns it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parked {
    Memory,
    Redis,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryReport {
    pub(crate) delivered: u64,
    pub(crate) remaining: bool,
}

impl PendingResults {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self::with_key(redis, PENDING_RESULTS_KEY)
    }

    pub(crate) fn with_key(redis: RedisHandle, key: &str) -> Self {
        Self { redis, key: Arc::from(key), local: Arc::new(Mutex::new(VecDeque::new())) }
    }

    pub(crate) async fn park(&self, result: AttemptResult) {
        metrics::counter!(RESULTS_PENDING).increment(1);

        match serde_json::to_string(&result) {
            Ok(payload) => match self.redis.push_list(&self.key, &payload).await {
                Ok(true) => {
                    tracing::info!(attempt_id = %result.attempt_id, "Result parked in Redis");
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to park result in Redis; using memory");
                }
            },
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode pending result; using memory");
            }
        }

        tracing::info!(attempt_id = %result.attempt_id, "Result parked in memory");
        self.local.lock().await.push_back(result);
    }

    pub(crate) async fn local_len(&self) -> usize {
        self.local.lock().await.len()
    }

    /// Replays up to `batch` parked results into the sink. Stops at the first failure
    /// and puts that result back.
    pub(crate) async fn retry(&self, sink: &dyn ResultSink, batch: u64) -> RetryReport {
        let mut report = RetryReport::default();

        for _ in 0..batch {
            let Some((result, parked)) = self.take_next().await else {
                return report;
            };

            match sink.record_attempt(&result).await {
                Ok(()) => {
                    report.delivered += 1;
                    tracing::info!(attempt_id = %result.attempt_id, "Pending result delivered");
                }
                Err(err) => {
                    tracing::warn!(
                        attempt_id = %result.attempt_id,
                        error = %err,
                        "Pending result still rejected by sink"
                    );
                    self.put_back(result, parked).await;
                    report.remaining = true;
                    return report;
                }
            }
        }

        report.remaining = true;
        report
    }

    async fn take_next(&self) -> Option<(AttemptResult, Parked)> {
        if let Some(result) = self.local.lock().await.pop_front() {
            return Some((result, Parked::Memory));
        }

        match self.redis.pop_list(&self.key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(result) => Some((result, Parked::Redis)),
                Err(err) => {
                    tracing::error!(error = %err, "Dropping undecodable pending result");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read pending results from Redis");
                None
            }
        }
    }

    /// Results popped from Redis go back to the head of the Redis list so a restart does
    /// not lose them. Memory is the fallback when Redis is gone.
    async fn put_back(&self, result: AttemptResult, parked: Parked) {
        if parked == Parked::Redis {
            match serde_json::to_string(&result) {
                Ok(payload) => match self.redis.push_list_front(&self.key, &payload).await {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(
                            attempt_id = %result.attempt_id,
                            error = %err,
                            "Failed to return result to Redis; keeping it in memory"
                        );
                    }
                },
                Err(err) => {
                    tracing::error!(error = %err, "Failed to encode pending result; using memory");
                }
            }
        }
        self.local.lock().await.push_front(result);
    }
}
