//! Node domain model
//!
//! A node is one compute backend offering text generation and/or rendering.
//! Nodes are never deleted when they stop answering; they are marked offline
//! so that their identity survives reconnection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A category of work a node can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Text generation (story, shots, prompts, narration...)
    TextGen,

    /// Image/video rendering
    Render,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::TextGen, Capability::Render];
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::TextGen => write!(f, "text_gen"),
            Capability::Render => write!(f, "render"),
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text_gen" | "textgen" | "text" => Ok(Capability::TextGen),
            "render" => Ok(Capability::Render),
            other => Err(format!("unknown capability: {}", other)),
        }
    }
}

/// Status of a single capability on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    /// Reachable and ready to accept work
    Online,

    /// Did not answer the last probe or heartbeat
    Offline,

    /// Currently leased by a pipeline step or running an agent job
    Busy,
}

impl std::fmt::Display for CapabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityStatus::Online => write!(f, "Online"),
            CapabilityStatus::Offline => write!(f, "Offline"),
            CapabilityStatus::Busy => write!(f, "Busy"),
        }
    }
}

impl std::str::FromStr for CapabilityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(CapabilityStatus::Online),
            "offline" => Ok(CapabilityStatus::Offline),
            "busy" => Ok(CapabilityStatus::Busy),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// How the registry learned about a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOrigin {
    /// Found by an active network probe
    Discovered,

    /// Pushed its own status through the coordination service
    Agent,

    /// Declared in configuration (cloud providers)
    Configured,
}

/// The protocol family used to talk to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    /// Local model-serving daemons (text daemon and/or render daemon)
    Local,

    /// A named cloud provider speaking the chat-completions protocol
    Cloud { provider: String },
}

/// Availability, status and model catalog of one capability on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityState {
    /// Whether the node offers this capability at all
    pub available: bool,

    /// Current status
    pub status: CapabilityStatus,

    /// Model identifiers offered for this capability
    pub models: Vec<String>,

    /// Base URL of the service exposing this capability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Version reported by the service, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl CapabilityState {
    /// A capability the node does not offer
    pub fn unavailable() -> Self {
        Self {
            available: false,
            status: CapabilityStatus::Offline,
            models: Vec::new(),
            endpoint: None,
            version: None,
        }
    }

    /// An online capability served at `endpoint` with the given models
    pub fn online(endpoint: impl Into<String>, models: Vec<String>) -> Self {
        let mut state = Self {
            available: true,
            status: CapabilityStatus::Online,
            models,
            endpoint: Some(endpoint.into()),
            version: None,
        };
        state.normalize();
        state
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    /// True when the capability is offered and currently online
    pub fn is_online(&self) -> bool {
        self.available && self.status == CapabilityStatus::Online
    }

    /// True when `model` is in this capability's catalog
    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Restores the availability/model invariant and sorts the catalog
    pub fn normalize(&mut self) {
        if !self.available {
            self.models.clear();
            self.status = CapabilityStatus::Offline;
        }
        self.models.sort();
        self.models.dedup();
    }
}

impl Default for CapabilityState {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// Auxiliary render models extracted from the render daemon's schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderCatalog {
    pub checkpoints: Vec<String>,
    pub loras: Vec<String>,
    pub vaes: Vec<String>,
    pub clips: Vec<String>,
}

/// A compute backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity (the canonical host for discovered nodes)
    pub id: String,

    /// Network address used to reach the node
    pub address: String,

    /// Other addresses merged into this entry
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Protocol family
    pub backend: BackendKind,

    /// How this node entered the registry
    pub origin: NodeOrigin,

    /// Text generation capability
    pub text_gen: CapabilityState,

    /// Rendering capability
    pub render: CapabilityState,

    /// LoRA/VAE/CLIP listings of the render daemon
    #[serde(default)]
    pub render_catalog: RenderCatalog,

    /// Job currently reported by an agent, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<String>,

    /// When this node was last probed or heard from
    pub last_probed_at: DateTime<Utc>,
}

impl Node {
    /// Creates a node with no capabilities
    pub fn new(id: impl Into<String>, address: impl Into<String>, origin: NodeOrigin) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            aliases: Vec::new(),
            backend: BackendKind::Local,
            origin,
            text_gen: CapabilityState::unavailable(),
            render: CapabilityState::unavailable(),
            render_catalog: RenderCatalog::default(),
            current_job: None,
            last_probed_at: Utc::now(),
        }
    }

    pub fn with_text_gen(mut self, state: CapabilityState) -> Self {
        self.text_gen = state;
        self
    }

    pub fn with_render(mut self, state: CapabilityState) -> Self {
        self.render = state;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn capability(&self, capability: Capability) -> &CapabilityState {
        match capability {
            Capability::TextGen => &self.text_gen,
            Capability::Render => &self.render,
        }
    }

    pub fn capability_mut(&mut self, capability: Capability) -> &mut CapabilityState {
        match capability {
            Capability::TextGen => &mut self.text_gen,
            Capability::Render => &mut self.render,
        }
    }

    /// True when any capability is online
    pub fn is_online(&self) -> bool {
        self.text_gen.is_online() || self.render.is_online()
    }

    /// Flips every capability to offline, keeping the last known catalog
    pub fn mark_offline(&mut self) {
        self.text_gen.status = CapabilityStatus::Offline;
        self.render.status = CapabilityStatus::Offline;
        self.current_job = None;
    }

    /// Restores the availability/model invariant on both capabilities
    pub fn normalize(&mut self) {
        self.text_gen.normalize();
        self.render.normalize();
    }

    /// True when at least one capability is offered
    pub fn has_any_capability(&self) -> bool {
        self.text_gen.available || self.render.available
    }

    /// True when `address` is this node's address or one of its aliases
    pub fn answers_to(&self, address: &str) -> bool {
        self.address == address || self.aliases.iter().any(|a| a == address)
    }

    /// Identical model catalogs on both capabilities
    pub fn same_catalog(&self, other: &Node) -> bool {
        self.text_gen.available == other.text_gen.available
            && self.render.available == other.render.available
            && sorted(&self.text_gen.models) == sorted(&other.text_gen.models)
            && sorted(&self.render.models) == sorted(&other.render.models)
    }

    pub fn host_kind(&self) -> HostKind {
        HostKind::of(&self.address)
    }
}

fn sorted(models: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = models.iter().map(String::as_str).collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Classification of a host address for deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Loopback,
    Private,
    Other,
}

impl HostKind {
    pub fn of(host: &str) -> Self {
        if host.eq_ignore_ascii_case("localhost") {
            return HostKind::Loopback;
        }

        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) if ip.is_loopback() => HostKind::Loopback,
            Ok(IpAddr::V4(ip)) if ip.is_private() => HostKind::Private,
            Ok(IpAddr::V6(ip)) if ip.is_loopback() => HostKind::Loopback,
            _ => HostKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_capability_has_no_models() {
        let mut state = CapabilityState::online("http://h:11434", vec!["llama3".to_string()]);
        state.available = false;
        state.normalize();

        assert!(state.models.is_empty());
        assert_eq!(state.status, CapabilityStatus::Offline);
        assert!(!state.is_online());
    }

    #[test]
    fn test_online_sorts_and_dedups_models() {
        let state = CapabilityState::online(
            "http://h:11434",
            vec!["b".to_string(), "a".to_string(), "b".to_string()],
        );
        assert_eq!(state.models, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_mark_offline_keeps_catalog() {
        let mut node = Node::new("10.0.0.2", "10.0.0.2", NodeOrigin::Discovered).with_text_gen(
            CapabilityState::online("http://10.0.0.2:11434", vec!["llama3".to_string()]),
        );
        node.mark_offline();

        assert!(!node.is_online());
        assert!(node.text_gen.available);
        assert!(node.text_gen.has_model("llama3"));
    }

    #[test]
    fn test_host_kind() {
        assert_eq!(HostKind::of("localhost"), HostKind::Loopback);
        assert_eq!(HostKind::of("127.0.0.1"), HostKind::Loopback);
        assert_eq!(HostKind::of("::1"), HostKind::Loopback);
        assert_eq!(HostKind::of("192.168.1.20"), HostKind::Private);
        assert_eq!(HostKind::of("10.1.2.3"), HostKind::Private);
        assert_eq!(HostKind::of("8.8.8.8"), HostKind::Other);
        assert_eq!(HostKind::of("gpu-box.local"), HostKind::Other);
    }

    #[test]
    fn test_same_catalog_ignores_order() {
        let a = Node::new("a", "127.0.0.1", NodeOrigin::Discovered).with_text_gen(
            CapabilityState::online("x", vec!["m1".to_string(), "m2".to_string()]),
        );
        let mut b = a.clone();
        b.text_gen.models = vec!["m2".to_string(), "m1".to_string()];
        assert!(a.same_catalog(&b));

        b.text_gen.models.push("m3".to_string());
        assert!(!a.same_catalog(&b));
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!("render".parse::<Capability>(), Ok(Capability::Render));
        assert_eq!("text_gen".parse::<Capability>(), Ok(Capability::TextGen));
        assert!("video".parse::<Capability>().is_err());
        assert_eq!(
            "busy".parse::<CapabilityStatus>(),
            Ok(CapabilityStatus::Busy)
        );
    }
}
