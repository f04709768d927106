//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{PipelineRun, RunFailure, RunOptions, RunStatus, StepKind};

/// Request to start a generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRun {
    /// The idea the story is written from
    pub premise: String,

    #[serde(default)]
    pub options: RunOptions,
}

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub status: RunStatus,
    pub progress: u8,
    pub current_step: Option<StepKind>,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            status: run.status,
            progress: run.progress,
            current_step: run.current_step.map(|i| run.steps[i].kind),
            failure: run.failure.clone(),
            created_at: run.created_at,
            finished_at: run.finished_at,
        }
    }
}
