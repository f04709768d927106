//! Pipeline orchestrator
//!
//! Runs the steps of one run sequentially in their fixed order. Each enabled
//! step is routed to a (node, model) target, leased, invoked and parsed;
//! the first failure ends the run and leaves every later step pending.
//! Every state change is published on the run's event channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reel_core::domain::log::{DEFAULT_LOG_RETENTION, LogEntry, LogLevel};
use reel_core::domain::pipeline::{
    FailureKind, PipelineRun, RunFailure, RunOptions, RunStatus, StepKind, TransitionError,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::events::{EventSender, RunEvent};
use super::instructions::{DefaultInstructions, StepInstructions};
use super::outputs::{Catalog, MusicCue, PerShot, PromptPair, RunArtifacts, ShotList, split_parts};
use crate::backend::response::parse_structured;
use crate::backend::{Backend, BackendError, InvocationRequest};
use crate::config::Config;
use crate::router::{CapabilityRouter, RouteError, Target};

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("step exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("missing {0} from an earlier step")]
    MissingInput(&'static str),
}

impl StepError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StepError::Route(_) => FailureKind::CapabilityUnavailable,
            StepError::Backend(err) => err.failure_kind(),
            StepError::Timeout(_) => FailureKind::Timeout,
            StepError::Cancelled => FailureKind::Cancelled,
            StepError::Transition(_) | StepError::MissingInput(_) => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub log_retention: usize,

    /// Deadline of a single step, all of its backend calls included
    pub step_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_retention: config.log_retention,
            step_timeout: config.step_timeout,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            log_retention: DEFAULT_LOG_RETENTION,
            step_timeout: Duration::from_secs(600),
        }
    }
}

/// Final state of a run and what it produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: PipelineRun,
    pub artifacts: RunArtifacts,
}

pub struct PipelineOrchestrator {
    router: Arc<CapabilityRouter>,
    backend: Arc<dyn Backend>,
    instructions: Arc<dyn StepInstructions>,
    settings: OrchestratorSettings,
}

impl PipelineOrchestrator {
    pub fn new(
        router: Arc<CapabilityRouter>,
        backend: Arc<dyn Backend>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            router,
            backend,
            instructions: Arc::new(DefaultInstructions),
            settings,
        }
    }

    pub fn with_instructions(mut self, instructions: Arc<dyn StepInstructions>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn router(&self) -> &Arc<CapabilityRouter> {
        &self.router
    }

    /// A fresh pending run with this orchestrator's log retention
    pub fn new_run(&self, options: RunOptions) -> PipelineRun {
        PipelineRun::new(options, self.settings.log_retention)
    }

    /// Drives `run` to a terminal status
    ///
    /// Stops early when `cancel` fires or the receiving side of `events` is
    /// dropped; the run then ends `Cancelled`.
    #[instrument(skip_all, fields(run_id = %run.id))]
    pub async fn execute(
        &self,
        run: PipelineRun,
        premise: &str,
        events: EventSender,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let mut exec = Execution {
            run,
            events,
            artifacts: RunArtifacts::default(),
        };

        exec.run.status = RunStatus::Running;
        exec.send(RunEvent::Started);
        let enabled = exec.run.enabled_steps();
        exec.log(LogLevel::Info, format!("Run started with {} enabled steps", enabled));
        info!(enabled, "Run started");

        let mut outcome: Result<(), (StepKind, StepError)> = Ok(());
        for index in 0..exec.run.steps.len() {
            let kind = exec.run.steps[index].kind;

            if !exec.run.steps[index].enabled {
                if let Err(err) = exec.run.steps[index].skip() {
                    outcome = Err((kind, err.into()));
                    break;
                }
                exec.publish_step(index);
                continue;
            }

            if cancel.is_cancelled() || exec.events.is_closed() {
                exec.run.current_step = Some(index);
                outcome = Err((kind, StepError::Cancelled));
                break;
            }

            if let Err(err) = self.run_step(&mut exec, index, premise, &cancel).await {
                outcome = Err((kind, err));
                break;
            }
        }

        finish(exec, outcome)
    }

    async fn run_step(
        &self,
        exec: &mut Execution,
        index: usize,
        premise: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        let kind = exec.run.steps[index].kind;
        exec.run.current_step = Some(index);

        let (target, lease) = match self.router.acquire(kind.name()).await {
            Ok(routed) => routed,
            Err(err) => {
                exec.run.steps[index].error = Some(err.to_string());
                exec.publish_step(index);
                return Err(err.into());
            }
        };

        exec.run.steps[index].start(target.node_id(), &target.model)?;
        exec.publish_step(index);
        exec.log(
            LogLevel::Info,
            format!(
                "Step '{}' started on {} with model {}",
                kind,
                target.node_id(),
                target.model
            ),
        );

        let listener = exec.events.clone();
        let deadline = self.settings.step_timeout;
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            _ = listener.closed() => Err(StepError::Cancelled),
            result = tokio::time::timeout(deadline, self.perform(exec, kind, &target, premise)) => {
                result.unwrap_or(Err(StepError::Timeout(deadline)))
            }
        };
        drop(lease);

        match result {
            Ok(summary) => {
                exec.run.steps[index].complete(summary.clone())?;
                exec.publish_step(index);
                exec.log(
                    LogLevel::Info,
                    format!("Step '{}' completed: {}", kind, summary),
                );
                Ok(())
            }
            Err(err) => {
                exec.run.steps[index].fail(err.to_string())?;
                exec.publish_step(index);
                Err(err)
            }
        }
    }

    /// Does the work of one step, returning its output summary
    async fn perform(
        &self,
        exec: &mut Execution,
        kind: StepKind,
        target: &Target,
        premise: &str,
    ) -> Result<String, StepError> {
        let system = self.instructions.instruction(kind);

        match kind {
            StepKind::Story => {
                let story = self.text(target, &system, premise).await?;
                let summary = format!("{} characters", story.chars().count());
                exec.artifacts.story = Some(story);
                Ok(summary)
            }

            StepKind::Segmentation => {
                let story = exec.story()?;
                let parts = split_parts(&self.text(target, &system, &story).await?);
                if parts.is_empty() {
                    return Err(BackendError::MalformedResponse(
                        "segmentation produced no parts".to_string(),
                    )
                    .into());
                }
                let summary = format!("{} parts", parts.len());
                exec.artifacts.parts = parts;
                Ok(summary)
            }

            StepKind::Shots => {
                let parts = if exec.artifacts.parts.is_empty() {
                    vec![exec.story()?]
                } else {
                    exec.artifacts.parts.clone()
                };

                let total = parts.len();
                let mut shots = Vec::new();
                for (i, part) in parts.iter().enumerate() {
                    let input = if total > 1 {
                        format!("Part {} of {}:\n{}", i + 1, total, part)
                    } else {
                        part.clone()
                    };
                    let list: ShotList = self.structured(target, &system, &input).await?;
                    shots.extend(
                        list.shots
                            .into_iter()
                            .filter(|shot| !shot.description.trim().is_empty()),
                    );
                    exec.publish_progress((i + 1) as f64 / total as f64);
                }

                if shots.is_empty() {
                    return Err(BackendError::MalformedResponse(
                        "shot breakdown contains no shots".to_string(),
                    )
                    .into());
                }
                let summary = format!("{} shots from {} parts", shots.len(), total);
                exec.artifacts.shots = shots;
                Ok(summary)
            }

            StepKind::Characters => {
                let listing = exec
                    .artifacts
                    .shots
                    .iter()
                    .enumerate()
                    .map(|(i, shot)| {
                        let mut line = format!("{}. {}", i + 1, shot.description.trim());
                        if !shot.characters.is_empty() {
                            line.push_str(&format!(" [characters: {}]", shot.characters.join(", ")));
                        }
                        if let Some(location) = &shot.location {
                            line.push_str(&format!(" [location: {}]", location));
                        }
                        line
                    })
                    .collect::<Vec<_>>()
                    .join("\n");

                let catalog: Catalog = self.structured(target, &system, &listing).await?;
                let summary = format!(
                    "{} characters, {} locations",
                    catalog.characters.len(),
                    catalog.locations.len()
                );
                exec.artifacts.catalog = Some(catalog);
                Ok(summary)
            }

            StepKind::Prompts => {
                let catalog = exec
                    .artifacts
                    .catalog
                    .clone()
                    .ok_or(StepError::MissingInput("character catalog"))?;
                let shots = exec.artifacts.shots.clone();

                let total = shots.len();
                for (i, shot) in shots.iter().enumerate() {
                    let pair: PromptPair = self
                        .structured(target, &system, &catalog.describe(shot))
                        .await?;
                    exec.artifacts.prompts.push(PerShot {
                        shot: i,
                        value: pair.validate()?,
                    });
                    exec.publish_progress((i + 1) as f64 / total as f64);
                }
                Ok(format!("{} prompts", total))
            }

            StepKind::Narration => {
                let lines: Vec<(usize, String)> = exec
                    .artifacts
                    .shots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, shot)| shot.spoken_text().map(|text| (i, text.to_string())))
                    .collect();

                let total = lines.len();
                for (n, (shot, text)) in lines.into_iter().enumerate() {
                    let narration = self.text(target, &system, &text).await?;
                    exec.artifacts.narration.push(PerShot {
                        shot,
                        value: narration,
                    });
                    exec.publish_progress((n + 1) as f64 / total as f64);
                }
                Ok(format!("{} narrated shots", total))
            }

            StepKind::Music => {
                let cues: Vec<(usize, String)> = exec
                    .artifacts
                    .shots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, shot)| {
                        shot.music_cue()
                            .map(|cue| (i, format!("Cue: {}\nShot: {}", cue, shot.description)))
                    })
                    .collect();

                let total = cues.len();
                for (n, (shot, input)) in cues.into_iter().enumerate() {
                    let cue: MusicCue = self.structured(target, &system, &input).await?;
                    exec.artifacts.music.push(PerShot { shot, value: cue });
                    exec.publish_progress((n + 1) as f64 / total as f64);
                }
                Ok(format!("{} music cues", total))
            }

            StepKind::Render => {
                let prompts = exec.artifacts.prompts.clone();

                let total = prompts.len();
                for (n, prompt) in prompts.into_iter().enumerate() {
                    let request =
                        InvocationRequest::new(prompt.value.negative, prompt.value.positive);
                    let artifact = self.backend.invoke(target, &request).await?.into_artifact()?;
                    exec.artifacts.renders.push(PerShot {
                        shot: prompt.shot,
                        value: artifact,
                    });
                    exec.publish_progress((n + 1) as f64 / total as f64);
                }
                Ok(format!("{} render jobs queued", total))
            }
        }
    }

    async fn text(&self, target: &Target, system: &str, input: &str) -> Result<String, StepError> {
        let request = InvocationRequest::new(system, input);
        Ok(self.backend.invoke(target, &request).await?.into_text()?)
    }

    async fn structured<T: DeserializeOwned>(
        &self,
        target: &Target,
        system: &str,
        input: &str,
    ) -> Result<T, StepError> {
        let text = self.text(target, system, input).await?;
        Ok(parse_structured(&text)?)
    }
}

/// Mutable state of one executing run
struct Execution {
    run: PipelineRun,
    events: EventSender,
    artifacts: RunArtifacts,
}

impl Execution {
    fn send(&self, event: RunEvent) {
        // A closed channel is noticed by the step loop
        let _ = self.events.send(event);
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message);
        self.run.log.push(entry.clone());
        self.send(RunEvent::Log(entry));
    }

    /// Publishes a step transition followed by the run's progress
    fn publish_step(&mut self, index: usize) {
        self.send(RunEvent::StepChanged {
            index,
            step: self.run.steps[index].clone(),
        });
        self.publish_progress(0.0);
    }

    fn publish_progress(&mut self, fraction: f64) {
        let progress = self.run.update_progress(fraction);
        self.send(RunEvent::Progress(progress));
    }

    fn story(&self) -> Result<String, StepError> {
        self.artifacts
            .story
            .clone()
            .ok_or(StepError::MissingInput("story"))
    }
}

fn finish(mut exec: Execution, outcome: Result<(), (StepKind, StepError)>) -> RunOutcome {
    let (status, failure) = match outcome {
        Ok(()) => {
            exec.run.current_step = None;
            info!(progress = exec.run.progress, "Run completed");
            exec.log(LogLevel::Info, "Run completed");
            (RunStatus::Completed, None)
        }
        Err((step, err)) => {
            let kind = err.failure_kind();
            let message = err.to_string();
            let status = if kind == FailureKind::Cancelled {
                warn!(%step, "Run cancelled");
                exec.log(LogLevel::Warning, format!("Run cancelled during step '{}'", step));
                RunStatus::Cancelled
            } else {
                error!(%step, ?kind, "Run failed: {}", message);
                exec.log(
                    LogLevel::Error,
                    format!("Step '{}' failed: {}", step, message),
                );
                RunStatus::Failed
            };
            (status, Some(RunFailure { step, kind, message }))
        }
    };

    let finished_at = Utc::now();
    exec.run.status = status;
    exec.run.failure = failure.clone();
    exec.run.finished_at = Some(finished_at);
    exec.send(RunEvent::Finished {
        status,
        failure,
        finished_at,
    });

    RunOutcome {
        run: exec.run,
        artifacts: exec.artifacts,
    }
}
