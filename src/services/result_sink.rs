use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::core::time::primitive_from_epoch_ms;
use crate::engine::session::{AttemptResult, ReportField};
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum SinkError {
    #[error("result storage failed: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("result could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("result field {0} out of range")]
    OutOfRange(&'static str),
}

/// Durable home for completed attempts.
#[async_trait]
pub(crate) trait ResultSink: Send + Sync {
    /// Must tolerate the same attempt being recorded twice.
    async fn record_attempt(&self, result: &AttemptResult) -> Result<(), SinkError>;

    /// Attempts already stored for this student and exam.
    async fn completed_attempts(&self, exam_id: &str, student_id: &str) -> Result<u32, SinkError>;
}

#[derive(Clone)]
pub(crate) struct PgResultSink {
    pool: PgPool,
}

impl PgResultSink {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultSink for PgResultSink {
    async fn record_attempt(&self, result: &AttemptResult) -> Result<(), SinkError> {
        let violation_count = match &result.violation_report {
            ReportField::Available(report) => report.violation_count,
            ReportField::Unavailable { .. } => 0,
        };

        let inserted = repositories::attempts::insert(
            &self.pool,
            repositories::attempts::CreateAttempt {
                id: result.attempt_id,
                exam_id: &result.exam_id,
                student_id: &result.student_id,
                attempt_number: to_i32("attempt_number", result.attempt_number)?,
                score: to_i32("score", result.score)?,
                total_marks: to_i32("total_marks", result.total_marks)?,
                percentage: result.percentage,
                passed: result.passed,
                outcomes: serde_json::to_value(&result.outcomes)?,
                violation_report: serde_json::to_value(&result.violation_report)?,
                violation_count: i32::try_from(violation_count)
                    .map_err(|_| SinkError::OutOfRange("violation_count"))?,
                submission_reason: result.submission_reason,
                time_taken_ms: result.time_taken_ms,
                started_at: primitive_from_epoch_ms(result.started_at_ms),
                completed_at: primitive_from_epoch_ms(result.completed_at_ms),
                answers_digest: &result.answers_digest,
            },
        )
        .await?;

        if !inserted {
            tracing::info!(attempt_id = %result.attempt_id, "Attempt already recorded");
        }
        Ok(())
    }

    async fn completed_attempts(&self, exam_id: &str, student_id: &str) -> Result<u32, SinkError> {
        let count =
            repositories::attempts::count_by_exam_and_student(&self.pool, exam_id, student_id)
                .await?;
        u32::try_from(count).map_err(|_| SinkError::OutOfRange("attempt count"))
    }
}

fn to_i32(field: &'static str, value: u32) -> Result<i32, SinkError> {
    i32::try_from(value).map_err(|_| SinkError::OutOfRange(field))
}
