use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::metrics::VIOLATIONS_RECORDED;
use crate::core::state::AppState;
use crate::engine::integrity::ReportedCapabilities;
use crate::engine::session::{ExamSession, MutationOutcome, TickOutcome};
use crate::repositories;
use crate::schemas::session::{
    ActivityRequest, Direction, MutationResponse, NavigateRequest, OpenSessionRequest,
    OpenSessionResponse, SelectAnswerRequest, SignalRequest, SignalResponse,
    StartSessionRequest, StoredAttemptResponse, SubmitResponse,
};
use crate::services::session_registry::{RegistryError, SharedSession};


pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(open_session))
        .route("/:session_id", get(get_session))
        .route("/:session_id/start", post(start_session))
        .route("/:session_id/answers/:question_id", put(select_answer).delete(clear_answer))
        .route("/:session_id/flags/:question_id", post(toggle_flag))
        .route("/:session_id/navigate", post(navigate))
        .route("/:session_id/signals", post(record_signal))
        .route("/:session_id/activity", post(record_activity))
        .route("/:session_id/submit", post(submit))
        .route("/:session_id/result", get(get_result))
        .route("/:session_id/retake", post(retake))
}

fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("Invalid session id".to_string()))
}

async fn find_session(state: &AppState, raw_id: &str) -> Result<SharedSession, ApiError> {
    let session_id = parse_session_id(raw_id)?;
    Ok(state.registry().get(session_id).await?)
}

fn mutation_response(outcome: MutationOutcome, session: &ExamSession) -> Json<MutationResponse> {
    let reason = match outcome {
        MutationOutcome::Applied => None,
        MutationOutcome::Rejected(reason) => Some(reason.to_string()),
    };
    Json(MutationResponse { accepted: outcome.is_applied(), reason, snapshot: session.snapshot() })
}

async fn opened(session: SharedSession, session_id: Uuid) -> Result<Response, ApiError> {
    let mut session = session.lock().await;
    let instructions = session.open_instructions()?.to_string();
    let body = OpenSessionResponse { session_id, instructions, snapshot: session.snapshot() };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn open_session(
    State(state): State<AppState>,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<Response, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let (session_id, session) =
        state.registry().open(&payload.exam_id, &payload.student_id).await?;
    opened(session, session_id).await
}

async fn get_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let snapshot = session.lock().await.snapshot();
    Ok(Json(snapshot).into_response())
}

async fn start_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    payload: Option<Json<StartSessionRequest>>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.unwrap_or_default();
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;

    let hooks = ReportedCapabilities::new(payload.supported(), payload.denied.iter().copied());
    session.accept_instructions(Box::new(hooks), payload.seed)?;
    Ok(Json(session.snapshot()).into_response())
}

async fn select_answer(
    Path((session_id, question_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(payload): Json<SelectAnswerRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;
    let outcome = session.select_answer(&question_id, &payload.option);
    Ok(mutation_response(outcome, &session))
}

async fn clear_answer(
    Path((session_id, question_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<MutationResponse>, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;
    let outcome = session.clear_answer(&question_id);
    Ok(mutation_response(outcome, &session))
}

async fn toggle_flag(
    Path((session_id, question_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<MutationResponse>, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;
    let outcome = session.toggle_flag(&question_id);
    Ok(mutation_response(outcome, &session))
}

async fn navigate(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<NavigateRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;

    let outcome = match (payload.index, payload.direction) {
        (Some(index), None) => session.go_to(index, payload.mode),
        (None, Some(Direction::Next)) => session.next(),
        (None, Some(Direction::Previous)) => session.previous(),
        _ => {
            return Err(ApiError::BadRequest(
                "Provide exactly one of index or direction".to_string(),
            ))
        }
    };
    Ok(mutation_response(outcome, &session))
}

async fn record_signal(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<SignalRequest>,
) -> Result<Json<SignalResponse>, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;

    let recorded = session.record_signal(payload.signal, &payload.detail);
    if let Some(kind) = recorded {
        metrics::counter!(VIOLATIONS_RECORDED, "kind" => kind.as_str()).increment(1);
        // Limits are enforced now rather than on the next scheduler beat.
        if let TickOutcome::Submitted(reason) = session.tick() {
            tracing::info!(
                session_id = %session.id(),
                reason = ?reason,
                "Signal ended the attempt"
            );
        }
    }

    let snapshot = session.snapshot();
    Ok(Json(SignalResponse {
        recorded: recorded.is_some(),
        violation_count: snapshot.violation_count,
        phase: snapshot.phase,
        submission_reason: snapshot.submission_reason,
    }))
}

async fn record_activity(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    payload: Option<Json<ActivityRequest>>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload.unwrap_or_default();
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;

    if payload.fullscreen_restored {
        session.report_fullscreen_restored();
    } else {
        session.record_activity();
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn submit(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let session = find_session(&state, &session_id).await?;
    let mut session = session.lock().await;

    let submitted = session.request_submit().is_some();
    Ok(Json(SubmitResponse { submitted, result: session.result_view() }))
}

async fn get_result(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    match state.registry().get(session_id).await {
        Ok(session) => {
            let view = session.lock().await.result_view();
            Ok(Json(view).into_response())
        }
        Err(RegistryError::NotFound(_)) => {
            let row = repositories::attempts::find_by_id(state.db(), session_id)
                .await
                .map_err(|e| ApiError::internal(e, "Failed to fetch attempt"))?
                .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
            Ok(Json(StoredAttemptResponse::from(row)).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

async fn retake(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let (new_id, session) = state.registry().retake(session_id).await?;
    opened(session, new_id).await
}
