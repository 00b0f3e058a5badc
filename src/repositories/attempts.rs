use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::AttemptRow;
use crate::db::types::SubmissionReason;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, attempt_number, score, total_marks, percentage, passed, \
    outcomes, violation_report, violation_count, submission_reason, time_taken_ms, \
    started_at, completed_at, answers_digest, recorded_at";

pub(crate) struct CreateAttempt<'a> {
    pub(crate) id: Uuid,
    pub(crate) exam_id: &'a str,
    pub(crate) student_id: &'a str,
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
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) completed_at: PrimitiveDateTime,
    pub(crate) answers_digest: &'a str,
}

/// Inserts a completed attempt. Replays of the same attempt id are ignored, so a
/// retried handoff never produces a second row. Returns whether a row was written.
pub(crate) async fn insert(pool: &PgPool, params: CreateAttempt<'_>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO exam_attempts (
            id, exam_id, student_id, attempt_number, score, total_marks, percentage, passed,
            outcomes, violation_report, violation_count, submission_reason, time_taken_ms,
            started_at, completed_at, answers_digest
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
        ON CONFLICT (id) DO NOTHING",
    )
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.student_id)
    .bind(params.attempt_number)
    .bind(params.score)
    .bind(params.total_marks)
    .bind(params.percentage)
    .bind(params.passed)
    .bind(Json(params.outcomes))
    .bind(Json(params.violation_report))
    .bind(params.violation_count)
    .bind(params.submission_reason)
    .bind(params.time_taken_ms)
    .bind(params.started_at)
    .bind(params.completed_at)
    .bind(params.answers_digest)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<AttemptRow>, sqlx::Error> {
    sqlx::query_as::<_, AttemptRow>(&format!("SELECT {COLUMNS} FROM exam_attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn count_by_exam_and_student(
    pool: &PgPool,
    exam_id: &str,
    student_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM exam_attempts WHERE exam_id = $1 AND student_id = $2")
        .bind(exam_id)
        .bind(student_id)
        .fetch_one(pool)
        .await
}
