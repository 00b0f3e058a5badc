use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "difficultylevel", rename_all = "lowercase")]
pub(crate) enum DifficultyLevel {
    Easy,
    Medium,
    Hard,
}

/// Why an attempt left the running phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submissionreason", rename_all = "snake_case")]
pub(crate) enum SubmissionReason {
    Manual,
    TimeExpired,
    ViolationLimit,
    FullscreenPolicy,
}

impl SubmissionReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::TimeExpired => "time_expired",
            Self::ViolationLimit => "violation_limit",
            Self::FullscreenPolicy => "fullscreen_policy",
        }
    }

    #[cfg(test)]
    pub(crate) fn is_forced(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_reason_serializes_snake_case() {
        let encoded = serde_json::to_string(&SubmissionReason::ViolationLimit).unwrap();
        assert_eq!(encoded, "\"violation_limit\"");
        assert_eq!(SubmissionReason::TimeExpired.as_str(), "time_expired");
    }

    #[test]
    fn only_manual_submission_is_voluntary() {
        assert!(!SubmissionReason::Manual.is_forced());
        assert!(SubmissionReason::TimeExpired.is_forced());
        assert!(SubmissionReason::FullscreenPolicy.is_forced());
    }
}
