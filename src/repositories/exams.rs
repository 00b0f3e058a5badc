use sqlx::PgPool;

use crate::db::models::{ExamRow, QuestionRow};

pub(crate) const COLUMNS: &str = "\
    id, title, description, subject, exam_type, duration_minutes, total_marks, \
    pass_threshold, instructions, security, created_at, updated_at";

pub(crate) const QUESTION_COLUMNS: &str = "\
    id, exam_id, position, prompt, options, correct_answer, marks, difficulty, subject, \
    explanation";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<ExamRow>, sqlx::Error> {
    sqlx::query_as::<_, ExamRow>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Questions in authoring order.
pub(crate) async fn list_questions(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<QuestionRow>, sqlx::Error> {
    sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions WHERE exam_id = $1 ORDER BY position, id"
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await
}
