//! Health Check API Handler

use axum::{Json, extract::State};
use reel_core::dto::node::NodeQuery;
use serde_json::{Value, json};

use crate::api::AppState;

/// GET /health
/// Liveness plus a count of nodes with at least one online capability
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let nodes = state.registry.list(&NodeQuery::default());
    let online = nodes.iter().filter(|n| n.is_online()).count();

    Json(json!({
        "status": "ok",
        "nodes": nodes.len(),
        "nodes_online": online,
    }))
}
