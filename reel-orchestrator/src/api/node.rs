//! Node API Handlers
//!
//! Registry listings, on-demand scans and model assignments.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use reel_core::domain::assignment::{AssignmentTable, ModelAssignment};
use reel_core::domain::node::Node;
use reel_core::dto::node::{NodeQuery, ScanQuery, ScanSummary};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

// =============================================================================
// Registry Endpoints
// =============================================================================

/// GET /api/nodes
/// List registered nodes, filtered by `capability` and `status`
pub async fn list_nodes(
    State(state): State<AppState>,
    Query(query): Query<NodeQuery>,
) -> ApiResult<Json<Vec<Node>>> {
    tracing::debug!("Listing nodes: {:?}", query);

    Ok(Json(state.registry.list(&query)))
}

/// GET /api/nodes/{id}
pub async fn get_node(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Node>> {
    tracing::debug!("Getting node: {}", id);

    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Node {} not found", id)))
}

/// POST /api/nodes/scan?quick=bool
/// Run a scan and wait for its summary
pub async fn scan(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<Json<ScanSummary>> {
    tracing::info!("Scan requested (quick: {})", query.quick);

    let report = if query.quick {
        state.scanner.quick_scan().await
    } else {
        state.scanner.full_scan().await?
    };

    Ok(Json(report.summary()))
}

// =============================================================================
// Assignment Endpoints
// =============================================================================

/// GET /api/assignments
pub async fn list_assignments(State(state): State<AppState>) -> Json<AssignmentTable> {
    Json(state.router.assignments())
}

/// PUT /api/assignments
/// Replace the candidate list of one step
pub async fn set_assignment(
    State(state): State<AppState>,
    Json(assignment): Json<ModelAssignment>,
) -> ApiResult<Json<ModelAssignment>> {
    if assignment.step.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Assignment step cannot be empty".to_string(),
        ));
    }

    tracing::info!(
        "Setting assignment for step {} ({} candidates)",
        assignment.step,
        assignment.candidates.len()
    );
    state.router.set_assignment(assignment.clone());

    Ok(Json(assignment))
}
