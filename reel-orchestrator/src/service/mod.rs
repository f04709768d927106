//! Service Module
//!
//! Business logic behind the HTTP API.

pub mod agent;
pub mod run;

pub use agent::{AgentBoard, AgentError};
pub use run::{RunError, RunService};
