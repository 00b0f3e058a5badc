use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::core::metrics::LIVE_SESSIONS;
use crate::engine::clock::Clock;
use crate::engine::session::{ExamSession, Phase, ResultHandoff, TickOutcome};
use crate::schemas::exam::LoadedExam;
use crate::services::exam_loader::{ExamLoader, LoadError};
use crate::services::result_sink::ResultSink;

pub(crate) type SharedSession = Arc<Mutex<ExamSession>>;

type AttemptKey = (String, String);

fn attempt_key(exam_id: &str, student_id: &str) -> AttemptKey {
    (exam_id.to_string(), student_id.to_string())
}

#[derive(Debug, Error)]
pub(crate) enum RegistryError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("session {0} not found")]
    NotFound(Uuid),
    #[error("maximum of {max} attempts reached for this exam")]
    MaxAttemptsReached { max: u32 },
    #[error("session is {0}; only completed sessions can be retaken")]
    NotCompleted(Phase),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TickSummary {
    pub(crate) running: usize,
    pub(crate) submitted: usize,
}

/// Owner of every live session in this process.
///
/// Sessions are handed out as `Arc<Mutex<_>>`; every command, tick and signal for one
/// attempt serializes on that mutex.
#[derive(Clone)]
pub(crate) struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    loader: Arc<dyn ExamLoader>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    handoff: Arc<dyn ResultHandoff>,
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
    attempts: Mutex<HashMap<AttemptKey, u32>>,
}

impl SessionRegistry {
    pub(crate) fn new(
        loader: Arc<dyn ExamLoader>,
        sink: Arc<dyn ResultSink>,
        clock: Arc<dyn Clock>,
        handoff: Arc<dyn ResultHandoff>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                loader,
                sink,
                clock,
                handoff,
                sessions: RwLock::new(HashMap::new()),
                attempts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Loads the exam and creates a session already showing its instructions.
    pub(crate) async fn open(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<(Uuid, SharedSession), RegistryError> {
        let exam = Arc::new(self.inner.loader.load_exam(exam_id).await?);
        self.create(exam, student_id).await
    }

    /// Starts a fresh attempt from a completed one, reusing its loaded exam.
    pub(crate) async fn retake(
        &self,
        session_id: Uuid,
    ) -> Result<(Uuid, SharedSession), RegistryError> {
        let previous = self.get(session_id).await?;
        let (exam, student_id) = {
            let session = previous.lock().await;
            if session.phase() != Phase::Completed {
                return Err(RegistryError::NotCompleted(session.phase()));
            }
            (session.exam().clone(), session.student_id().to_string())
        };

        self.create(exam, &student_id).await
    }

    pub(crate) async fn get(&self, session_id: Uuid) -> Result<SharedSession, RegistryError> {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(RegistryError::NotFound(session_id))
    }

    pub(crate) async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// One scheduler beat: advances every running session's timer and policy checks.
    pub(crate) async fn tick_all(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        for session in self.snapshot().await {
            match session.lock().await.tick() {
                TickOutcome::Idle => {}
                TickOutcome::Running { .. } => summary.running += 1,
                TickOutcome::Submitted(_) => summary.submitted += 1,
            }
        }
        summary
    }

    /// Re-sends results whose first handoff failed. Returns how many went through.
    pub(crate) async fn retry_pending_handoffs(&self) -> usize {
        let mut delivered = 0;
        for session in self.snapshot().await {
            let mut session = session.lock().await;
            if session.has_pending_handoff() && session.retry_handoff() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drops sessions idle past the retention window: completed ones whose result has been
    /// handed off, and ones that were opened but never started. An unstarted session gives
    /// its attempt back.
    pub(crate) async fn evict_stale(&self, retention_ms: i64) -> usize {
        let now = self.inner.clock.now_ms();
        let mut expired = Vec::new();
        let mut released = Vec::new();
        for (id, session) in self.entries().await {
            let session = session.lock().await;
            if session.is_unstarted() {
                if now - session.opened_at_ms() >= retention_ms {
                    expired.push(id);
                    let key = attempt_key(&session.exam().config.id, session.student_id());
                    released.push((key, session.attempt_number()));
                }
                continue;
            }
            let finished_long_ago = session
                .completed_at_ms()
                .is_some_and(|completed_at| now - completed_at >= retention_ms);
            if finished_long_ago && !session.has_pending_handoff() {
                expired.push(id);
            }
        }

        if expired.is_empty() {
            return 0;
        }

        {
            let mut sessions = self.inner.sessions.write().await;
            for id in &expired {
                sessions.remove(id);
            }
            metrics::gauge!(LIVE_SESSIONS).set(sessions.len() as f64);
            tracing::info!(
                evicted = expired.len(),
                abandoned = released.len(),
                remaining = sessions.len(),
                "Evicted sessions"
            );
        }

        if !released.is_empty() {
            let mut attempts = self.inner.attempts.lock().await;
            for (key, attempt_number) in released {
                if let Some(used) = attempts.get_mut(&key) {
                    if *used == attempt_number {
                        *used -= 1;
                    }
                }
            }
        }
        expired.len()
    }

    /// Hands back the student's unstarted session for this exam if one exists, so a lost
    /// session id never burns an attempt. Otherwise reserves the next attempt.
    async fn create(
        &self,
        exam: Arc<LoadedExam>,
        student_id: &str,
    ) -> Result<(Uuid, SharedSession), RegistryError> {
        let key = attempt_key(&exam.config.id, student_id);
        let persisted = self.persisted_attempts(&key).await;

        // Held until the new session is registered so concurrent opens cannot both reserve.
        let mut attempts = self.inner.attempts.lock().await;
        if let Some((id, existing)) = self.find_unstarted(&key).await {
            tracing::info!(session_id = %id, student_id, "Resuming unstarted session");
            return Ok((id, existing));
        }

        let max = exam.config.security.max_attempts;
        let used = attempts.entry(key).or_insert(0);
        let prior = (*used).max(persisted);
        if prior >= max {
            tracing::info!(student_id, max, "Attempt refused; limit reached");
            return Err(RegistryError::MaxAttemptsReached { max });
        }
        *used = prior + 1;
        let attempt_number = *used;

        let id = Uuid::new_v4();
        let mut session = ExamSession::new(
            id,
            student_id,
            attempt_number,
            exam,
            self.inner.clock.clone(),
            self.inner.handoff.clone(),
        );
        if let Err(err) = session.open_instructions() {
            tracing::error!(session_id = %id, error = %err, "Fresh session refused instructions");
        }

        let shared = Arc::new(Mutex::new(session));
        let mut sessions = self.inner.sessions.write().await;
        sessions.insert(id, shared.clone());
        metrics::gauge!(LIVE_SESSIONS).set(sessions.len() as f64);
        tracing::info!(session_id = %id, student_id, attempt_number, "Session opened");

        Ok((id, shared))
    }

    async fn persisted_attempts(&self, key: &AttemptKey) -> u32 {
        let (exam_id, student_id) = key;
        match self.inner.sink.completed_attempts(exam_id, student_id).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(
                    exam_id = %exam_id,
                    student_id = %student_id,
                    error = %err,
                    "Could not count stored attempts; using in-process count"
                );
                0
            }
        }
    }

    async fn find_unstarted(&self, key: &AttemptKey) -> Option<(Uuid, SharedSession)> {
        for (id, session) in self.entries().await {
            let guard = session.lock().await;
            if guard.is_unstarted()
                && guard.exam().config.id == key.0
                && guard.student_id() == key.1
            {
                drop(guard);
                return Some((id, session));
            }
        }
        None
    }

    async fn snapshot(&self) -> Vec<SharedSession> {
        self.inner.sessions.read().await.values().cloned().collect()
    }

    async fn entries(&self) -> Vec<(Uuid, SharedSession)> {
        self.inner.sessions.read().await.iter().map(|(id, s)| (*id, s.clone())).collect()
    }
}
