//! Agent API Handlers
//!
//! Heartbeat push endpoint and the pull endpoint scanners read from.

use axum::{Json, extract::State, http::StatusCode};
use reel_core::dto::agent::AgentRecord;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /api/agents/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(record): Json<AgentRecord>,
) -> ApiResult<StatusCode> {
    let record = state.agents.heartbeat(record)?;
    tracing::debug!("Heartbeat accepted from {}", record.hostname);

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/agents
/// Records of agents heard from within the TTL
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentRecord>> {
    tracing::debug!("Listing live agents");

    Json(state.agents.live())
}
