use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::types::{DifficultyLevel, SubmissionReason};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamRow {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) subject: String,
    pub(crate) exam_type: String,
    pub(crate) duration_minutes: i32,
    pub(crate) total_marks: i32,
    pub(crate) pass_threshold: f64,
    pub(crate) instructions: String,
    pub(crate) security: Json<serde_json::Value>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct QuestionRow {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) position: i32,
    pub(crate) prompt: String,
    pub(crate) options: Json<Vec<String>>,
    pub(crate) correct_answer: String,
    pub(crate) marks: i32,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) subject: String,
    pub(crate) explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct AttemptRow {
    pub(crate) id: Uuid,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) score: i32,
    pub(crate) total_marks: i32,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
    pub(crate) outcomes: Json<serde_json::Value>,
    pub(crate) violation_report: Json<serde_json::Value>,
    pub(crate) violation_count: i32,
    pub(crate) submission_reason: SubmissionReason,
    pub(crate) time_taken_ms: i64,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) completed_at: PrimitiveDateTime,
    pub(crate) answers_digest: String,
    pub(crate) recorded_at: PrimitiveDateTime,
}
