use std::error::Error as _;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::engine::session::SessionError;
use crate::services::exam_loader::LoadError;
use crate::services::session_registry::RegistryError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    UnprocessableEntity(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ApiError::NotFound("Session not found".to_string()),
            RegistryError::Load(LoadError::NotFound(_)) => {
                ApiError::NotFound("Exam not found".to_string())
            }
            RegistryError::Load(LoadError::InvalidExam(reason)) => {
                ApiError::UnprocessableEntity(format!("Exam cannot be taken: {reason}"))
            }
            RegistryError::Load(err @ LoadError::Storage(_)) => {
                ApiError::internal(err, "Failed to load exam")
            }
            err @ (RegistryError::MaxAttemptsReached { .. } | RegistryError::NotCompleted(_)) => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::Arming(integrity) => {
                let cause =
                    integrity.source().map(|source| format!(" ({source})")).unwrap_or_default();
                ApiError::Conflict(format!(
                    "{err}{cause}. Grant the permission in the browser and start again."
                ))
            }
            SessionError::InvalidPhase { .. } => ApiError::Conflict(err.to_string()),
            SessionError::NoQuestions | SessionError::InvalidDuration => {
                ApiError::UnprocessableEntity(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                message
            }
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Conflict(message)
            | ApiError::UnprocessableEntity(message) => message,
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;
    use crate::engine::integrity::{Capability, HookError, IntegrityError};

    #[tokio::test]
    async fn arming_failure_is_conflict_with_cause() {
        let err = ApiError::from(SessionError::Arming(IntegrityError::Arming {
            capability: Capability::Fullscreen,
            source: HookError::PermissionDenied(Capability::Fullscreen),
        }));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 409);
        let detail = json["detail"].as_str().unwrap();
        assert!(detail.contains("permission denied for fullscreen"), "{detail}");
    }

    #[test]
    fn load_errors_map_to_client_statuses() {
        let missing = ApiError::from(RegistryError::Load(LoadError::NotFound("x".into())));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let invalid = ApiError::from(RegistryError::Load(LoadError::InvalidExam("empty".into())));
        assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let exhausted = ApiError::from(RegistryError::MaxAttemptsReached { max: 2 });
        assert_eq!(exhausted.status(), StatusCode::CONFLICT);
    }
}
