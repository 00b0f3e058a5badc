use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::core::shutdown;
use crate::engine::session::{AttemptResult, HandoffError, ResultHandoff};
use crate::services::analytics;
use crate::services::pending_results::PendingResults;
use crate::services::result_sink::ResultSink;

/// Engine side of the result channel. Sending never blocks the session lock.
#[derive(Clone)]
pub(crate) struct DispatchHandoff {
    sender: mpsc::UnboundedSender<AttemptResult>,
}

impl ResultHandoff for DispatchHandoff {
    fn hand_off(&self, result: &AttemptResult) -> Result<(), HandoffError> {
        self.sender.send(result.clone()).map_err(|_| HandoffError::Closed)
    }
}

pub(crate) fn channel() -> (DispatchHandoff, mpsc::UnboundedReceiver<AttemptResult>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (DispatchHandoff { sender }, receiver)
}

/// Drains completed attempts into the sink. Failed writes are parked for the retry loop.
pub(crate) async fn run(
    mut receiver: mpsc::UnboundedReceiver<AttemptResult>,
    sink: Arc<dyn ResultSink>,
    pending: PendingResults,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            maybe_result = receiver.recv() => {
                let Some(result) = maybe_result else { break };
                deliver(sink.as_ref(), &pending, result).await;
            }
            _ = shutdown::wait(&mut shutdown) => {
                receiver.close();
                while let Some(result) = receiver.recv().await {
                    deliver(sink.as_ref(), &pending, result).await;
                }
                break;
            }
        }
    }

    tracing::info!("Result dispatcher stopped");
}

async fn deliver(sink: &dyn ResultSink, pending: &PendingResults, result: AttemptResult) {
    match sink.record_attempt(&result).await {
        Ok(()) => {
            tracing::debug!(attempt_id = %result.attempt_id, "Attempt recorded");
        }
        Err(err) => {
            tracing::error!(
                attempt_id = %result.attempt_id,
                exam_id = %result.exam_id,
                error = %err,
                "Failed to record attempt; parking for retry"
            );
            pending.park(result.clone()).await;
        }
    }

    analytics::attempt_completed(&result);
}
