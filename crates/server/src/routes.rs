use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use shopassist_agent::runtime::{ControllerError, DialogueController, TurnReport};
use shopassist_agent::session::SessionView;
use shopassist_core::domain::transcript::{ConversationTurn, SessionId};
use shopassist_core::errors::{ApplicationError, InterfaceError};
use shopassist_core::flows::DialoguePhase;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    controller: Arc<DialogueController>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub turn: TurnReport,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: SessionId,
    pub phase: DialoguePhase,
    pub transcript: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(controller: Arc<DialogueController>) -> Router {
    Router::new()
        .route("/api/v1/sessions", post(open_session))
        .route("/api/v1/sessions/{session_id}", delete(close_session))
        .route("/api/v1/sessions/{session_id}/messages", post(post_message))
        .route("/api/v1/sessions/{session_id}/reset", post(reset_session))
        .route("/api/v1/sessions/{session_id}/transcript", get(transcript))
        .with_state(ApiState { controller })
}

async fn open_session(State(state): State<ApiState>) -> ApiResult<SessionView> {
    let view = state.controller.open_session().await.map_err(reject)?;
    info!(
        event_name = "api.session.opened",
        session_id = %view.session_id,
        "session opened over http"
    );
    Ok(Json(view))
}

async fn post_message(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(body): Json<MessageRequest>,
) -> ApiResult<TurnResponse> {
    if body.text.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: "message text is required".to_string(),
                correlation_id: Uuid::new_v4().to_string(),
            }),
        ));
    }

    let session_id = SessionId(session_id);
    let turn = state.controller.handle_message(&session_id, &body.text).await.map_err(reject)?;
    let session = state.controller.view(&session_id).await.map_err(reject)?;
    Ok(Json(TurnResponse { turn, session }))
}

async fn reset_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionView> {
    let view = state.controller.reset(&SessionId(session_id)).await.map_err(reject)?;
    Ok(Json(view))
}

async fn close_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    state.controller.close(&SessionId(session_id)).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn transcript(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> ApiResult<TranscriptResponse> {
    let view = state.controller.view(&SessionId(session_id)).await.map_err(reject)?;
    Ok(Json(TranscriptResponse {
        session_id: view.session_id,
        phase: view.phase,
        transcript: view.transcript.turns().to_vec(),
    }))
}

fn reject(error: ControllerError) -> (StatusCode, Json<ApiError>) {
    let interface = ApplicationError::from(error).into_interface(Uuid::new_v4().to_string());
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "api.request_failed",
        correlation_id = interface.correlation_id(),
        status = status.as_u16(),
        error = %interface,
        "request failed"
    );
    (
        status,
        Json(ApiError {
            error: interface.user_message().to_string(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}
