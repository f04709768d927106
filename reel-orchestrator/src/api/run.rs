//! Run API Handlers
//!
//! HTTP endpoints for generation runs.

use axum::{
    Json,
    extract::{Path, State},
};
use reel_core::domain::pipeline::PipelineRun;
use reel_core::dto::run::{RunSummary, StartRun};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::pipeline::RunArtifacts;

/// POST /api/runs
/// Start a run; returns its initial snapshot
pub async fn start_run(
    State(state): State<AppState>,
    Json(req): Json<StartRun>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!("Starting run with options {:?}", req.options);

    let run = state.runs.start(req)?;

    Ok(Json(run))
}

/// GET /api/runs
pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunSummary>> {
    tracing::debug!("Listing runs");

    Json(state.runs.list())
}

/// GET /api/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    let run = state.runs.get(id)?;

    Ok(Json(run))
}

/// GET /api/runs/{id}/artifacts
pub async fn get_artifacts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunArtifacts>> {
    let artifacts = state.runs.artifacts(id)?;

    Ok(Json(artifacts))
}

/// POST /api/runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!("Cancelling run: {}", id);

    let run = state.runs.cancel(id)?;

    Ok(Json(run))
}
