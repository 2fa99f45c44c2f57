use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use shopassist_agent::runtime::DialogueController;
use shopassist_core::config::LlmProvider;

#[derive(Clone)]
pub struct HealthState {
    controller: Arc<DialogueController>,
    provider: LlmProvider,
    model: String,
}

impl HealthState {
    pub fn new(controller: Arc<DialogueController>, provider: LlmProvider, model: String) -> Self {
        Self { controller, provider, model }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub catalog: HealthCheck,
    pub oracle: HealthCheck,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let entries = state.controller.catalog().len();
    let catalog = if entries > 0 {
        HealthCheck { status: "ready", detail: format!("{entries} catalog entries loaded") }
    } else {
        HealthCheck { status: "degraded", detail: "catalog is empty".to_string() }
    };
    let provider = match state.provider {
        LlmProvider::OpenAi => "openai",
        LlmProvider::Ollama => "ollama",
    };
    let oracle =
        HealthCheck { status: "ready", detail: format!("{provider} model `{}`", state.model) };
    let ready = catalog.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        catalog,
        oracle,
        active_sessions: state.controller.session_count().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
