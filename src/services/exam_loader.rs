use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use validator::Validate;

use crate::db::models::{ExamRow, QuestionRow};
use crate::repositories;
use crate::schemas::exam::{ExamConfig, LoadedExam, Question, SecurityPolicy};

#[derive(Debug, Error)]
pub(crate) enum LoadError {
    #[error("exam {0} not found")]
    NotFound(String),
    #[error("exam is not usable: {0}")]
    InvalidExam(String),
    #[error("exam storage failed: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Source of exam configuration and questions. Loaded exams are read-only.
#[async_trait]
pub(crate) trait ExamLoader: Send + Sync {
    async fn load_exam(&self, exam_id: &str) -> Result<LoadedExam, LoadError>;
}

#[derive(Clone)]
pub(crate) struct PgExamLoader {
    pool: PgPool,
    default_max_violations: Option<u32>,
}

impl PgExamLoader {
    pub(crate) fn new(pool: PgPool, default_max_violations: Option<u32>) -> Self {
        Self { pool, default_max_violations }
    }
}

#[async_trait]
impl ExamLoader for PgExamLoader {
    async fn load_exam(&self, exam_id: &str) -> Result<LoadedExam, LoadError> {
        let exam = repositories::exams::find_by_id(&self.pool, exam_id)
            .await?
            .ok_or_else(|| LoadError::NotFound(exam_id.to_string()))?;
        let questions = repositories::exams::list_questions(&self.pool, exam_id).await?;

        let mut loaded = from_rows(exam, questions)?;
        if loaded.config.security.max_violations.is_none() {
            loaded.config.security.max_violations = self.default_max_violations;
        }

        validate_exam(&loaded)?;
        tracing::debug!(
            exam_id,
            questions = loaded.questions.len(),
            total_marks = loaded.config.total_marks,
            "Exam loaded"
        );
        Ok(loaded)
    }
}

fn from_rows(exam: ExamRow, questions: Vec<QuestionRow>) -> Result<LoadedExam, LoadError> {
    let security: SecurityPolicy = serde_json::from_value(exam.security.0)
        .map_err(|err| LoadError::InvalidExam(format!("security policy: {err}")))?;

    let config = ExamConfig {
        id: exam.id,
        title: exam.title,
        description: exam.description,
        subject: exam.subject,
        exam_type: exam.exam_type,
        duration_minutes: non_negative("duration_minutes", exam.duration_minutes)?,
        total_marks: non_negative("total_marks", exam.total_marks)?,
        pass_threshold: exam.pass_threshold,
        instructions: exam.instructions,
        security,
    };

    let questions = questions
        .into_iter()
        .map(|row| {
            Ok(Question {
                marks: non_negative("marks", row.marks)?,
                id: row.id,
                prompt: row.prompt,
                options: row.options.0,
                correct_answer: row.correct_answer,
                difficulty: row.difficulty,
                subject: row.subject,
                explanation: row.explanation,
            })
        })
        .collect::<Result<Vec<_>, LoadError>>()?;

    Ok(LoadedExam { config, questions })
}

fn non_negative(field: &str, value: i32) -> Result<u32, LoadError> {
    u32::try_from(value).map_err(|_| LoadError::InvalidExam(format!("{field} is negative")))
}

/// Structural checks an exam must pass before any session is built from it.
pub(crate) fn validate_exam(exam: &LoadedExam) -> Result<(), LoadError> {
    exam.config.validate().map_err(|err| LoadError::InvalidExam(err.to_string()))?;

    if exam.questions.is_empty() {
        return Err(LoadError::InvalidExam("exam has no questions".to_string()));
    }

    let mut seen = HashSet::with_capacity(exam.questions.len());
    for question in &exam.questions {
        if !seen.insert(question.id.as_str()) {
            return Err(LoadError::InvalidExam(format!("duplicate question id {}", question.id)));
        }
        if question.marks == 0 {
            return Err(LoadError::InvalidExam(format!("question {} has no marks", question.id)));
        }
        if question.options.is_empty() {
            return Err(LoadError::InvalidExam(format!("question {} has no options", question.id)));
        }
        if !question.has_option(&question.correct_answer) {
            return Err(LoadError::InvalidExam(format!(
                "question {} correct answer is not among its options",
                question.id
            )));
        }
    }

    let marks = exam
        .questions
        .iter()
        .try_fold(0u32, |total, question| total.checked_add(question.marks))
        .ok_or_else(|| LoadError::InvalidExam("question marks overflow".to_string()))?;
    if marks != exam.config.total_marks {
        return Err(LoadError::InvalidExam(format!(
            "total_marks {} does not match question marks {marks}",
            exam.config.total_marks
        )));
    }

    Ok(())
}
