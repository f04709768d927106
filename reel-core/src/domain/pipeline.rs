//! Pipeline run domain types
//!
//! A run is an ordered sequence of steps. Each step moves along
//! `Pending -> Running -> {Completed | Failed}` or `Pending -> Skipped`;
//! every other transition is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::log::RunLog;
use crate::domain::node::Capability;

/// The kinds of work a run performs, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Story,
    Segmentation,
    Shots,
    Characters,
    Prompts,
    Narration,
    Music,
    Render,
}

impl StepKind {
    /// Fixed dependency order
    pub const ORDER: [StepKind; 8] = [
        StepKind::Story,
        StepKind::Segmentation,
        StepKind::Shots,
        StepKind::Characters,
        StepKind::Prompts,
        StepKind::Narration,
        StepKind::Music,
        StepKind::Render,
    ];

    /// Step name used for model assignments
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Story => "story",
            StepKind::Segmentation => "segmentation",
            StepKind::Shots => "shots",
            StepKind::Characters => "characters",
            StepKind::Prompts => "prompts",
            StepKind::Narration => "narration",
            StepKind::Music => "music",
            StepKind::Render => "render",
        }
    }

    /// Capability a node needs to run this step
    pub fn capability(&self) -> Capability {
        match self {
            StepKind::Render => Capability::Render,
            _ => Capability::TextGen,
        }
    }

    /// Mandatory steps always run; the others depend on run options
    pub fn is_mandatory(&self) -> bool {
        matches!(
            self,
            StepKind::Story | StepKind::Shots | StepKind::Characters | StepKind::Prompts
        )
    }

    /// Steps whose backend output must parse as a JSON object
    pub fn expects_structured(&self) -> bool {
        matches!(
            self,
            StepKind::Shots | StepKind::Characters | StepKind::Prompts | StepKind::Music
        )
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepKind::ORDER
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown step: {}", s))
    }
}

/// Feature flags for the optional steps of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Split the story into narrative parts before shot breakdown
    #[serde(default)]
    pub segmentation: bool,

    /// Generate narration for shots carrying dialogue or narration
    #[serde(default)]
    pub narration: bool,

    /// Generate music cues for shots carrying a cue
    #[serde(default)]
    pub music: bool,

    /// Submit render jobs for every shot
    #[serde(default)]
    pub render: bool,
}

impl RunOptions {
    pub fn is_enabled(&self, kind: StepKind) -> bool {
        match kind {
            StepKind::Segmentation => self.segmentation,
            StepKind::Narration => self.narration,
            StepKind::Music => self.music,
            StepKind::Render => self.render,
            _ => true,
        }
    }
}

/// Step execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub const ALL: [StepStatus; 5] = [
        StepStatus::Pending,
        StepStatus::Running,
        StepStatus::Completed,
        StepStatus::Failed,
        StepStatus::Skipped,
    ];

    /// The only legal edges of the step state machine
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Rejected step state change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition for step '{step}': {from:?} -> {to:?}")]
pub struct TransitionError {
    pub step: StepKind,
    pub from: StepStatus,
    pub to: StepStatus,
}

/// One unit of pipeline work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    pub status: StepStatus,

    /// Whether this step counts towards progress
    pub enabled: bool,

    pub node_id: Option<String>,
    pub model: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output_summary: Option<String>,
    pub error: Option<String>,
}

impl Step {
    pub fn new(kind: StepKind, enabled: bool) -> Self {
        Self {
            kind,
            status: StepStatus::Pending,
            enabled,
            node_id: None,
            model: None,
            started_at: None,
            ended_at: None,
            output_summary: None,
            error: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Binds the routed target and enters `Running`
    pub fn start(
        &mut self,
        node_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(StepStatus::Running)?;
        self.node_id = Some(node_id.into());
        self.model = Some(model.into());
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, summary: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(StepStatus::Completed)?;
        self.ended_at = Some(Utc::now());
        self.output_summary = Some(summary.into());
        self.error = None;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(StepStatus::Failed)?;
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    pub fn skip(&mut self) -> Result<(), TransitionError> {
        self.transition(StepStatus::Skipped)
    }

    fn transition(&mut self, to: StepStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                step: self.kind,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CapabilityUnavailable,
    MalformedResponse,
    CredentialMissing,
    CredentialInvalid,
    Transport,
    Timeout,
    Cancelled,

    /// Orchestrator bookkeeping error, e.g. a rejected step transition
    Internal,
}

/// Terminal failure of a run, naming the failing step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub step: StepKind,
    pub kind: FailureKind,
    pub message: String,
}

/// Execution state of one generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub options: RunOptions,
    pub steps: Vec<Step>,
    pub current_step: Option<usize>,

    /// Overall progress, 0..=100, never decreases
    pub progress: u8,

    pub log: RunLog,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(options: RunOptions, log_retention: usize) -> Self {
        let steps = StepKind::ORDER
            .into_iter()
            .map(|kind| Step::new(kind, options.is_enabled(kind)))
            .collect();

        Self {
            id: Uuid::new_v4(),
            status: RunStatus::Pending,
            options,
            steps,
            current_step: None,
            progress: 0,
            log: RunLog::new(log_retention),
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn step(&self, kind: StepKind) -> Option<&Step> {
        self.steps.iter().find(|s| s.kind == kind)
    }

    pub fn step_mut(&mut self, kind: StepKind) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.kind == kind)
    }

    pub fn enabled_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.enabled).count()
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.enabled && s.status == StepStatus::Completed)
            .count()
    }

    /// Recomputes progress from completed steps plus the finished fraction
    /// of the current step, never letting it decrease
    pub fn update_progress(&mut self, current_fraction: f64) -> u8 {
        let total = self.enabled_steps();
        if total == 0 {
            self.progress = 100;
            return self.progress;
        }

        let fraction = if current_fraction.is_finite() {
            current_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let done = self.completed_steps() as f64 + fraction;
        let pct = ((done / total as f64) * 100.0).floor().min(100.0) as u8;

        self.progress = self.progress.max(pct);
        self.progress
    }

    pub fn failed_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }
}
