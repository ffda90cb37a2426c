use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::errors::AppError;
use crate::models::{AgentConfig, GenerateDescriptionRequest, GenerateDescriptionResponse};
use crate::routes::AppState;
use crate::session::{AgentPersistence, DescriptionGenerator};

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET `/api/agents` — catalog of saved agents
pub async fn list_agents_handler(State(state): State<AppState>) -> Response {
    match state.agents.list_agents().await {
        Ok(agents) => Json(agents).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/api/agents/{id}`
pub async fn get_agent_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.agents.get_agent(&id).await {
        Ok(agent) => Json(agent).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/api/agents` — create; any id in the body is ignored
pub async fn create_agent_handler(
    State(state): State<AppState>,
    Json(mut agent): Json<AgentConfig>,
) -> Response {
    agent.id = None;
    match state.agents.create_agent(agent).await {
        Ok(saved) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// PUT `/api/agents/{id}`
pub async fn update_agent_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(agent): Json<AgentConfig>,
) -> Response {
    match state.agents.update_agent(&id, agent).await {
        Ok(saved) => Json(saved).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/api/agents/generate-description`
pub async fn generate_description_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateDescriptionRequest>,
) -> Response {
    match state.agents.generate_description(&request.seed).await {
        Ok(description) => Json(GenerateDescriptionResponse { description }).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Helper ────────────────────────────────────────────────────────────────────

pub fn status_for(err: &AppError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_agent_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub fn error_response(err: &AppError) -> Response {
    let body = json!({ "error": err.to_string(), "kind": err.kind() });
    (status_for(err), Json(body)).into_response()
}
