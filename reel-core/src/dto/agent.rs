//! Agent DTOs
//!
//! Records pushed by self-reporting agents and served by the coordination
//! service's pull endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::node::{CapabilityState, CapabilityStatus, Node, NodeOrigin};

/// Default port of the local text generation daemon
pub const DEFAULT_TEXT_GEN_PORT: u16 = 11434;

/// Default port of the local render daemon
pub const DEFAULT_RENDER_PORT: u16 = 8188;

/// One capability as reported by an agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapability {
    pub available: bool,

    #[serde(default)]
    pub models: Vec<String>,

    /// Base URL of the local service, when the agent knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Status record of a self-reporting agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Machine hostname, unique per agent
    pub hostname: String,

    /// Addresses of the machine, preferred first
    #[serde(default)]
    pub ips: Vec<String>,

    #[serde(default)]
    pub text_gen: AgentCapability,

    #[serde(default)]
    pub render: AgentCapability,

    /// Identifier of the job the machine is working on, if any
    #[serde(default)]
    pub current_job: Option<String>,

    /// Set by the coordination service when the record was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl AgentRecord {
    /// Registry id of the node this agent reports
    pub fn node_id(&self) -> String {
        format!("agent:{}", self.hostname)
    }

    /// Address used to reach the agent's services
    pub fn address(&self) -> &str {
        self.ips
            .first()
            .map(String::as_str)
            .unwrap_or(self.hostname.as_str())
    }

    /// Converts the record into a registry node
    ///
    /// A reported current job marks every available capability busy.
    pub fn to_node(&self) -> Node {
        let address = self.address().to_string();
        let busy = self.current_job.is_some();

        let text_gen = capability_state(&self.text_gen, &address, DEFAULT_TEXT_GEN_PORT, busy);
        let render = capability_state(&self.render, &address, DEFAULT_RENDER_PORT, busy);

        let mut node = Node::new(self.node_id(), address.clone(), NodeOrigin::Agent)
            .with_text_gen(text_gen)
            .with_render(render);

        node.aliases = self
            .ips
            .iter()
            .filter(|ip| **ip != address)
            .cloned()
            .chain(std::iter::once(self.hostname.clone()))
            .collect();
        node.current_job = self.current_job.clone();
        node.last_probed_at = self.last_seen.unwrap_or_else(Utc::now);
        node
    }
}

fn capability_state(
    reported: &AgentCapability,
    address: &str,
    default_port: u16,
    busy: bool,
) -> CapabilityState {
    if !reported.available {
        return CapabilityState::unavailable();
    }

    let endpoint = reported
        .endpoint
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", address, default_port));
    let mut state = CapabilityState::online(endpoint, reported.models.clone());
    if busy {
        state.status = CapabilityStatus::Busy;
    }
    state
}
