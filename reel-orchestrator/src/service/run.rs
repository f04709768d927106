//! Run Service
//!
//! Starts pipeline runs in the background and keeps a snapshot of each one,
//! folded from the run's event channel. Only the most recent finished runs
//! are kept.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use reel_core::domain::pipeline::PipelineRun;
use reel_core::dto::run::{RunSummary, StartRun};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::{PipelineOrchestrator, RunArtifacts, events};

/// Longest premise accepted
const MAX_PREMISE_BYTES: usize = 16 * 1024;

const DEFAULT_RUN_RETENTION: usize = 100;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("run {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, RunError>;

struct RunEntry {
    snapshot: PipelineRun,

    /// Set once the run is finished
    artifacts: Option<RunArtifacts>,
    cancel: CancellationToken,
}

type RunTable = Arc<RwLock<HashMap<Uuid, RunEntry>>>;

pub struct RunService {
    orchestrator: Arc<PipelineOrchestrator>,
    runs: RunTable,

    /// Cancels every run on shutdown
    shutdown: CancellationToken,

    /// Finished runs kept before the oldest is dropped
    retention: usize,
}

impl RunService {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            orchestrator,
            runs: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            retention: DEFAULT_RUN_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// Cancels runs through `shutdown` as well as their own token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Creates a run and executes it in the background
    ///
    /// Returns the run's initial (pending) snapshot.
    pub fn start(&self, req: StartRun) -> Result<PipelineRun> {
        validate_start_request(&req)?;

        let run = self.orchestrator.new_run(req.options);
        let id = run.id;
        let cancel = self.shutdown.child_token();

        write(&self.runs).insert(
            id,
            RunEntry {
                snapshot: run.clone(),
                artifacts: None,
                cancel: cancel.clone(),
            },
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let runs = Arc::clone(&self.runs);
        let initial = run.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            let (tx, mut rx) = events::channel();

            let execution = orchestrator.execute(initial, &req.premise, tx, cancel);
            let listener = async {
                while let Some(event) = rx.recv().await {
                    if let Some(entry) = write(&runs).get_mut(&id) {
                        event.apply(&mut entry.snapshot);
                    }
                }
            };
            let (outcome, ()) = tokio::join!(execution, listener);

            let mut table = write(&runs);
            if let Some(entry) = table.get_mut(&id) {
                entry.snapshot = outcome.run;
                entry.artifacts = Some(outcome.artifacts);
            }
            let evicted = evict_finished(&mut table, retention);
            drop(table);

            if !evicted.is_empty() {
                tracing::debug!("Dropped {} finished run(s): {:?}", evicted.len(), evicted);
            }
        });

        tracing::info!("Run created: {} with options {:?}", id, run.options);

        Ok(run)
    }

    /// Latest snapshot of a run
    pub fn get(&self, id: Uuid) -> Result<PipelineRun> {
        read(&self.runs)
            .get(&id)
            .map(|entry| entry.snapshot.clone())
            .ok_or(RunError::NotFound(id))
    }

    /// Outputs of a finished run
    pub fn artifacts(&self, id: Uuid) -> Result<RunArtifacts> {
        let runs = read(&self.runs);
        let entry = runs.get(&id).ok_or(RunError::NotFound(id))?;
        entry.artifacts.clone().ok_or_else(|| {
            RunError::InvalidState(format!(
                "Run {} has not finished (current: {})",
                id, entry.snapshot.status
            ))
        })
    }

    /// Summaries of all runs, newest first
    pub fn list(&self) -> Vec<RunSummary> {
        let mut summaries: Vec<RunSummary> = read(&self.runs)
            .values()
            .map(|entry| RunSummary::from(&entry.snapshot))
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Requests cancellation of a running run
    pub fn cancel(&self, id: Uuid) -> Result<PipelineRun> {
        let runs = read(&self.runs);
        let entry = runs.get(&id).ok_or(RunError::NotFound(id))?;

        if entry.snapshot.status.is_terminal() {
            return Err(RunError::InvalidState(format!(
                "Run {} already finished with status {}",
                id, entry.snapshot.status
            )));
        }

        entry.cancel.cancel();
        tracing::info!("Run {} cancellation requested", id);

        Ok(entry.snapshot.clone())
    }
}

fn read(runs: &RunTable) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, RunEntry>> {
    runs.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(runs: &RunTable) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, RunEntry>> {
    runs.write().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the oldest finished runs beyond `retention`, returning their ids
fn evict_finished(runs: &mut HashMap<Uuid, RunEntry>, retention: usize) -> Vec<Uuid> {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = runs
        .iter()
        .filter(|(_, entry)| entry.artifacts.is_some())
        .map(|(id, entry)| {
            let at = entry.snapshot.finished_at.unwrap_or(entry.snapshot.created_at);
            (at, *id)
        })
        .collect();

    if finished.len() <= retention {
        return Vec::new();
    }

    finished.sort();
    let excess = finished.len() - retention;
    finished
        .into_iter()
        .take(excess)
        .map(|(_, id)| {
            runs.remove(&id);
            id
        })
        .collect()
}

// =============================================================================
// Validation
// =============================================================================

fn validate_start_request(req: &StartRun) -> Result<()> {
    if req.premise.trim().is_empty() {
        return Err(RunError::ValidationError(
            "Premise cannot be empty".to_string(),
        ));
    }

    if req.premise.len() > MAX_PREMISE_BYTES {
        return Err(RunError::ValidationError(format!(
            "Premise is too long (max {} bytes)",
            MAX_PREMISE_BYTES
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, all_options, happy_answer, orchestrator, registry};
    use reel_core::domain::pipeline::{RunOptions, RunStatus, StepStatus};
    use std::time::Duration;

    fn service(delay: Option<Duration>) -> RunService {
        RunService::new(Arc::new(orchestrator(
            registry(),
            ScriptedBackend {
                answer: Box::new(happy_answer),
                delay,
            },
            Duration::from_secs(3600),
        )))
    }

    async fn wait_until_finished(service: &RunService, id: Uuid) -> PipelineRun {
        for _ in 0..200 {
            let run = service.get(id).unwrap();
            if run.status.is_terminal() && service.artifacts(id).is_ok() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} did not finish", id);
    }

    fn start(premise: &str, options: RunOptions) -> StartRun {
        StartRun {
            premise: premise.to_string(),
            options,
        }
    }

    #[tokio::test]
    async fn test_run_executes_in_background() {
        let service = service(None);
        let run = service.start(start("a lighthouse keeper", all_options())).unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        let finished = wait_until_finished(&service, run.id).await;
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.progress, 100);
        assert!(finished.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(!finished.log.is_empty());

        let artifacts = service.artifacts(run.id).unwrap();
        assert_eq!(artifacts.renders.len(), 2);

        let summaries = service.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_premise_is_rejected() {
        let service = service(None);
        assert!(matches!(
            service.start(start("  ", RunOptions::default())),
            Err(RunError::ValidationError(_))
        ));
        assert!(service.list().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_run() {
        let service = service(Some(Duration::from_secs(3600)));
        let run = service.start(start("premise", RunOptions::default())).unwrap();

        // Unfinished runs have no artifacts yet
        assert!(matches!(
            service.artifacts(run.id),
            Err(RunError::InvalidState(_))
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        service.cancel(run.id).unwrap();

        let finished = wait_until_finished(&service, run.id).await;
        assert_eq!(finished.status, RunStatus::Cancelled);
        assert!(matches!(
            service.cancel(run.id),
            Err(RunError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_oldest_finished_runs_are_dropped() {
        let service = service(None).with_retention(2);

        let mut ids = Vec::new();
        for premise in ["first", "second", "third"] {
            let run = service.start(start(premise, RunOptions::default())).unwrap();
            wait_until_finished(&service, run.id).await;
            ids.push(run.id);
        }

        assert!(matches!(service.get(ids[0]), Err(RunError::NotFound(_))));
        assert!(matches!(service.artifacts(ids[0]), Err(RunError::NotFound(_))));
        assert!(service.get(ids[1]).is_ok());
        assert!(service.artifacts(ids[2]).is_ok());
        assert_eq!(service.list().len(), 2);
    }

    #[tokio::test]
    async fn test_running_runs_are_never_dropped() {
        let service = service(Some(Duration::from_secs(3600))).with_retention(1);
        let a = service.start(start("a", RunOptions::default())).unwrap();
        let b = service.start(start("b", RunOptions::default())).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(service.list().len(), 2);

        service.cancel(a.id).unwrap();
        wait_until_finished(&service, a.id).await;
        assert!(service.get(b.id).is_ok());
        assert!(service.get(a.id).is_ok());
    }

    #[test]
    fn test_unknown_run_is_not_found() {
        let service = service(None);
        let id = Uuid::new_v4();
        assert!(matches!(service.get(id), Err(RunError::NotFound(_))));
        assert!(matches!(service.cancel(id), Err(RunError::NotFound(_))));
    }
}
