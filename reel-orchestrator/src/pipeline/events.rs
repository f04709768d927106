//! Run progress events
//!
//! The orchestrator publishes every state change of a run on an unbounded
//! channel handed over at run start. Listeners fold the events into their
//! own snapshot with [`RunEvent::apply`].

use chrono::{DateTime, Utc};
use reel_core::domain::log::LogEntry;
use reel_core::domain::pipeline::{PipelineRun, RunFailure, RunStatus, Step};
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<RunEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Started,

    /// A step changed state; carries the whole step
    StepChanged { index: usize, step: Step },

    Progress(u8),

    Log(LogEntry),

    Finished {
        status: RunStatus,
        failure: Option<RunFailure>,
        finished_at: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn apply(&self, run: &mut PipelineRun) {
        match self {
            RunEvent::Started => run.status = RunStatus::Running,
            RunEvent::StepChanged { index, step } => {
                if let Some(slot) = run.steps.get_mut(*index) {
                    *slot = step.clone();
                    run.current_step = Some(*index);
                }
            }
            RunEvent::Progress(progress) => run.progress = run.progress.max(*progress),
            RunEvent::Log(entry) => run.log.push(entry.clone()),
            RunEvent::Finished {
                status,
                failure,
                finished_at,
            } => {
                run.status = *status;
                run.failure = failure.clone();
                run.finished_at = Some(*finished_at);
                if *status == RunStatus::Completed {
                    run.current_step = None;
                }
            }
        }
    }
}
