//! Pipeline execution
//!
//! [`PipelineOrchestrator`] drives a [`PipelineRun`](reel_core::domain::pipeline::PipelineRun)
//! through its steps and reports progress as [`RunEvent`]s.

pub mod events;
pub mod instructions;
pub mod orchestrator;
pub mod outputs;

pub use events::{EventReceiver, EventSender, RunEvent};
pub use instructions::{DefaultInstructions, StepInstructions};
pub use orchestrator::{OrchestratorSettings, PipelineOrchestrator, RunOutcome, StepError};
pub use outputs::RunArtifacts;
