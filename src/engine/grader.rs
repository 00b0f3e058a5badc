use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schemas::exam::Question;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QuestionOutcome {
    pub(crate) question_id: String,
    /// Empty when the question was left unanswered.
    pub(crate) selected_option: String,
    pub(crate) is_correct: bool,
    pub(crate) marks_awarded: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradeOutcome {
    pub(crate) score: u32,
    pub(crate) total_marks: u32,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
    pub(crate) outcomes: Vec<QuestionOutcome>,
}

/// Scores an answer snapshot against the attempt's question order.
///
/// Unanswered questions stay in the outcome list with an empty selection and zero marks.
/// Percentage is rounded to two decimals before the pass check, so the stored
/// percentage and `passed` always agree.
pub(crate) fn grade(
    questions: &[Question],
    answers: &HashMap<String, String>,
    total_marks: u32,
    pass_threshold: f64,
) -> GradeOutcome {
    let outcomes: Vec<QuestionOutcome> = questions
        .iter()
        .map(|question| {
            let selected = answers.get(&question.id).cloned().unwrap_or_default();
            let is_correct = !selected.is_empty() && selected == question.correct_answer;
            QuestionOutcome {
                question_id: question.id.clone(),
                selected_option: selected,
                is_correct,
                marks_awarded: if is_correct { question.marks } else { 0 },
            }
        })
        .collect();

    let score = outcomes
        .iter()
        .fold(0u32, |score, outcome| score.saturating_add(outcome.marks_awarded));
    let percentage = if total_marks == 0 {
        0.0
    } else {
        round2(f64::from(score) / f64::from(total_marks) * 100.0)
    };

    GradeOutcome { score, total_marks, percentage, passed: percentage >= pass_threshold, outcomes }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
