use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::types::DifficultyLevel;

/// A single multiple-choice question. The correct answer is stored by value so it
/// survives option shuffling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) prompt: String,
    pub(crate) options: Vec<String>,
    #[serde(alias = "correctAnswer")]
    pub(crate) correct_answer: String,
    pub(crate) marks: u32,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) subject: String,
    #[serde(default)]
    pub(crate) explanation: Option<String>,
}

impl Question {
    pub(crate) fn has_option(&self, value: &str) -> bool {
        self.options.iter().any(|option| option == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub(crate) struct SecurityPolicy {
    #[serde(default, alias = "randomizeQuestions")]
    pub(crate) randomize_questions: bool,
    #[serde(default, alias = "randomizeOptions")]
    pub(crate) randomize_options: bool,
    #[serde(default, alias = "preventCopyPaste")]
    pub(crate) prevent_copy_paste: bool,
    #[serde(default, alias = "fullScreenMode")]
    pub(crate) full_screen_mode: bool,
    #[serde(default, alias = "strictTimeLimit")]
    pub(crate) strict_time_limit: bool,
    #[serde(default = "default_true", alias = "showResultsImmediately")]
    pub(crate) show_results_immediately: bool,
    #[serde(default = "default_true", alias = "allowReview")]
    pub(crate) allow_review: bool,
    #[serde(default = "default_max_attempts", alias = "maxAttempts")]
    #[validate(range(min = 1, message = "max_attempts must be positive"))]
    pub(crate) max_attempts: u32,
    #[serde(default = "default_passing_score", alias = "passingScore")]
    #[validate(range(min = 0.0, max = 100.0, message = "passing_score must be within 0..=100"))]
    pub(crate) passing_score: f64,
    #[serde(default, alias = "maxViolations")]
    pub(crate) max_violations: Option<u32>,
    #[serde(default = "default_inactivity_timeout", alias = "inactivityTimeoutSeconds")]
    pub(crate) inactivity_timeout_seconds: u64,
    #[serde(default = "default_fullscreen_grace", alias = "fullscreenGraceSeconds")]
    pub(crate) fullscreen_grace_seconds: u64,
    #[serde(default = "default_fullscreen_failures", alias = "fullscreenMaxFailures")]
    #[validate(range(min = 1, message = "fullscreen_max_failures must be positive"))]
    pub(crate) fullscreen_max_failures: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            randomize_questions: false,
            randomize_options: false,
            prevent_copy_paste: false,
            full_screen_mode: false,
            strict_time_limit: false,
            show_results_immediately: default_true(),
            allow_review: default_true(),
            max_attempts: default_max_attempts(),
            passing_score: default_passing_score(),
            max_violations: None,
            inactivity_timeout_seconds: default_inactivity_timeout(),
            fullscreen_grace_seconds: default_fullscreen_grace(),
            fullscreen_max_failures: default_fullscreen_failures(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub(crate) struct ExamConfig {
    pub(crate) id: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) subject: String,
    #[serde(default, alias = "examType")]
    pub(crate) exam_type: String,
    #[serde(alias = "durationMinutes")]
    #[validate(range(min = 1, message = "duration_minutes must be positive"))]
    pub(crate) duration_minutes: u32,
    #[serde(alias = "totalMarks")]
    pub(crate) total_marks: u32,
    #[serde(alias = "passThreshold")]
    #[validate(range(min = 0.0, max = 100.0, message = "pass_threshold must be within 0..=100"))]
    pub(crate) pass_threshold: f64,
    #[serde(default)]
    pub(crate) instructions: String,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) security: SecurityPolicy,
}

impl ExamConfig {
    pub(crate) fn duration_seconds(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }
}

/// Immutable exam input shared by every attempt built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LoadedExam {
    pub(crate) config: ExamConfig,
    pub(crate) questions: Vec<Question>,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    1
}

fn default_passing_score() -> f64 {
    60.0
}

fn default_inactivity_timeout() -> u64 {
    300
}

fn default_fullscreen_grace() -> u64 {
    10
}

fn default_fullscreen_failures() -> u32 {
    3
}
