//! Node discovery
//!
//! Active probing of candidate hosts, network scans and agent pulls. Nothing
//! in here fails a pipeline run: unreachable hosts simply contribute no
//! result.

pub mod agents;
pub mod known_hosts;
pub mod probe;
pub mod ranges;
pub mod scan;

use reel_client::ClientError;
use thiserror::Error;

pub use agents::{AgentSource, CoordinatorAgents};
pub use known_hosts::KnownHosts;
pub use probe::{ProbeEvent, ProbeOutcome, ProbePhase, ProbePorts, ProbeResult, Prober};
pub use scan::{ScanReport, ScanSettings, Scanner};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid address range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("agent pull failed: {0}")]
    Agents(#[from] ClientError),

    #[error("known hosts file error: {0}")]
    KnownHosts(#[from] std::io::Error),

    #[error("known hosts file is malformed: {0}")]
    KnownHostsFormat(#[from] serde_json::Error),
}
