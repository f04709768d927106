//! Node DTOs
//!
//! Query parameters and scan summaries exchanged over the coordinator API.

use serde::{Deserialize, Serialize};

use crate::domain::node::{Capability, CapabilityStatus};

/// Filter for node listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeQuery {
    /// Only nodes offering this capability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,

    /// Only nodes whose capability (or any capability) has this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CapabilityStatus>,
}

/// Request options for a scan
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScanQuery {
    /// Restrict the scan to known hosts plus localhost
    #[serde(default)]
    pub quick: bool,
}

/// Outcome of a network scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub quick: bool,

    /// Number of candidate hosts probed
    pub hosts_probed: usize,

    /// Ids of nodes found (probes and agents)
    pub nodes_found: Vec<String>,

    /// Ids of previously known nodes flipped to offline
    pub nodes_marked_offline: Vec<String>,

    pub duration_ms: u64,
}
