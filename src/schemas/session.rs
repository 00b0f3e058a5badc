use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::AttemptRow;
use crate::db::types::SubmissionReason;
use crate::engine::integrity::{Capability, Signal};
use crate::engine::session::{NavigateMode, Phase, ResultView, SessionSnapshot};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct OpenSessionRequest {
    #[validate(length(min = 1, max = 64))]
    pub(crate) exam_id: String,
    #[validate(length(min = 1, max = 128))]
    pub(crate) student_id: String,
}

/// Capabilities the client can watch. A missing list means the client supports every one.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct StartSessionRequest {
    #[serde(default)]
    pub(crate) capabilities: Option<Vec<Capability>>,
    #[serde(default)]
    pub(crate) denied: Vec<Capability>,
    #[serde(default)]
    pub(crate) seed: Option<u64>,
}

impl StartSessionRequest {
    pub(crate) fn supported(&self) -> Vec<Capability> {
        self.capabilities.clone().unwrap_or_else(|| Capability::ALL.to_vec())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SelectAnswerRequest {
    pub(crate) option: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NavigateRequest {
    #[serde(default)]
    pub(crate) index: Option<usize>,
    #[serde(default)]
    pub(crate) direction: Option<Direction>,
    #[serde(default)]
    pub(crate) mode: NavigateMode,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignalRequest {
    pub(crate) signal: Signal,
    #[serde(default)]
    pub(crate) detail: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ActivityRequest {
    #[serde(default)]
    pub(crate) fullscreen_restored: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenSessionResponse {
    pub(crate) session_id: Uuid,
    pub(crate) instructions: String,
    pub(crate) snapshot: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub(crate) struct MutationResponse {
    pub(crate) accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<String>,
    pub(crate) snapshot: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub(crate) struct SignalResponse {
    pub(crate) recorded: bool,
    pub(crate) violation_count: usize,
    pub(crate) phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) submission_reason: Option<SubmissionReason>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) submitted: bool,
    pub(crate) result: ResultView,
}

/// A graded attempt served from storage after its live session has been evicted.
#[derive(Debug, Serialize)]
pub(crate) struct StoredAttemptResponse {
    pub(crate) kind: &'static str,
    pub(crate) attempt_id: Uuid,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) score: i32,
    pub(crate) total_marks: i32,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
    pub(crate) outcomes: serde_json::Value,
    pub(crate) violation_report: serde_json::Value,
    pub(crate) violation_count: i32,
    pub(crate) submission_reason: SubmissionReason,
    pub(crate) time_taken_ms: i64,
    pub(crate) started_at: String,
    pub(crate) completed_at: String,
    pub(crate) answers_digest: String,
}

impl From<AttemptRow> for StoredAttemptResponse {
    fn from(row: AttemptRow) -> Self {
        Self {
            kind: "stored",
            attempt_id: row.id,
            exam_id: row.exam_id,
            student_id: row.student_id,
            attempt_number: row.attempt_number,
            score: row.score,
            total_marks: row.total_marks,
            percentage: row.percentage,
            passed: row.passed,
            outcomes: row.outcomes.0,
            violation_report: row.violation_report.0,
            violation_count: row.violation_count,
            submission_reason: row.submission_reason,
            time_taken_ms: row.time_taken_ms,
            started_at: format_primitive(row.started_at),
            completed_at: format_primitive(row.completed_at),
            answers_digest: row.answers_digest,
        }
    }
}
