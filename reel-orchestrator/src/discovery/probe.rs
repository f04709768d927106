//! Capability probe
//!
//! Checks one host for a text generation daemon and a render daemon. Both
//! checks run concurrently with a short timeout and are independent: a host
//! may answer on one port and not the other.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reel_core::domain::node::{CapabilityState, Node, NodeOrigin, RenderCatalog};
use reel_core::dto::agent::{DEFAULT_RENDER_PORT, DEFAULT_TEXT_GEN_PORT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ScanError;

/// Paths answered by the render daemon's stats endpoint, tried in order
const RENDER_INFO_PATHS: [&str; 3] = ["/system_stats", "/api/system_stats", "/queue"];

/// Loader nodes of the render schema and the input listing their files
const CATALOG_INPUTS: [(&str, &str, CatalogSlot); 8] = [
    ("CheckpointLoaderSimple", "ckpt_name", CatalogSlot::Checkpoint),
    ("CheckpointLoader", "ckpt_name", CatalogSlot::Checkpoint),
    ("UNETLoader", "unet_name", CatalogSlot::Checkpoint),
    ("LoraLoader", "lora_name", CatalogSlot::Lora),
    ("LoraLoaderModelOnly", "lora_name", CatalogSlot::Lora),
    ("VAELoader", "vae_name", CatalogSlot::Vae),
    ("CLIPLoader", "clip_name", CatalogSlot::Clip),
    ("DualCLIPLoader", "clip_name1", CatalogSlot::Clip),
];

#[derive(Debug, Clone, Copy)]
enum CatalogSlot {
    Checkpoint,
    Lora,
    Vae,
    Clip,
}

/// Ports probed on every candidate host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePorts {
    pub text_gen: u16,
    pub render: u16,
}

impl Default for ProbePorts {
    fn default() -> Self {
        Self {
            text_gen: DEFAULT_TEXT_GEN_PORT,
            render: DEFAULT_RENDER_PORT,
        }
    }
}

/// Which part of a probe an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbePhase {
    TextGen,
    RenderInfo,
    RenderCatalog,
    Agents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Reachable,
    Unreachable { reason: String },
    Malformed { reason: String },
}

/// Structured record of one probe attempt
#[derive(Debug, Clone, Serialize)]
pub struct ProbeEvent {
    pub host: String,
    pub phase: ProbePhase,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
    pub at: DateTime<Utc>,
}

impl ProbeEvent {
    pub fn new(host: impl Into<String>, phase: ProbePhase, outcome: ProbeOutcome) -> Self {
        let event = Self {
            host: host.into(),
            phase,
            outcome,
            at: Utc::now(),
        };
        tracing::debug!(
            host = %event.host,
            phase = ?event.phase,
            outcome = ?event.outcome,
            "probe"
        );
        event
    }

    pub fn is_reachable(&self) -> bool {
        self.outcome == ProbeOutcome::Reachable
    }
}

/// Text generation daemon found on a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextGenService {
    pub endpoint: String,
    pub models: Vec<String>,
    pub version: Option<String>,
}

/// Render daemon found on a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderService {
    pub endpoint: String,
    pub version: Option<String>,
    pub catalog: RenderCatalog,
}

/// Services that answered on one host
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub host: String,
    pub text_gen: Option<TextGenService>,
    pub render: Option<RenderService>,
    pub probed_at: DateTime<Utc>,
}

impl ProbeResult {
    /// Registry entry for the probed host, identified by its address
    pub fn to_node(&self) -> Node {
        let mut node = Node::new(self.host.clone(), self.host.clone(), NodeOrigin::Discovered);

        if let Some(text) = &self.text_gen {
            node.text_gen = CapabilityState::online(text.endpoint.clone(), text.models.clone())
                .with_version(text.version.clone());
        }

        if let Some(render) = &self.render {
            node.render =
                CapabilityState::online(render.endpoint.clone(), render.catalog.checkpoints.clone())
                    .with_version(render.version.clone());
            node.render_catalog = render.catalog.clone();
        }

        node.last_probed_at = self.probed_at;
        node
    }
}

/// Result of probing one host
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// `None` when neither service answered
    pub result: Option<ProbeResult>,
    pub events: Vec<ProbeEvent>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

enum FetchError {
    /// Connection refused, timeout, DNS...
    Transport(String),
    Status(u16),
    Decode(String),
}

impl From<FetchError> for ProbeOutcome {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transport(reason) => ProbeOutcome::Unreachable { reason },
            FetchError::Status(status) => ProbeOutcome::Unreachable {
                reason: format!("HTTP {}", status),
            },
            FetchError::Decode(reason) => ProbeOutcome::Malformed { reason },
        }
    }
}

/// HTTP prober with a per-request timeout
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Probes both services of `host`
    pub async fn probe(&self, host: &str, ports: ProbePorts) -> ProbeReport {
        let ((text_gen, text_events), (render, render_events)) = tokio::join!(
            self.probe_text_gen(host, ports.text_gen),
            self.probe_render(host, ports.render)
        );

        let mut events = text_events;
        events.extend(render_events);

        let result = (text_gen.is_some() || render.is_some()).then(|| ProbeResult {
            host: host.to_string(),
            text_gen,
            render,
            probed_at: Utc::now(),
        });

        ProbeReport { result, events }
    }

    async fn probe_text_gen(
        &self,
        host: &str,
        port: u16,
    ) -> (Option<TextGenService>, Vec<ProbeEvent>) {
        let endpoint = base_url(host, port);

        match self
            .get_json::<TagsResponse>(&format!("{}/api/tags", endpoint))
            .await
        {
            Ok(tags) => {
                let version = self
                    .get_json::<VersionResponse>(&format!("{}/api/version", endpoint))
                    .await
                    .ok()
                    .map(|v| v.version);
                let models = tags.models.into_iter().map(|m| m.name).collect();

                let event = ProbeEvent::new(host, ProbePhase::TextGen, ProbeOutcome::Reachable);
                (
                    Some(TextGenService {
                        endpoint,
                        models,
                        version,
                    }),
                    vec![event],
                )
            }
            Err(err) => (
                None,
                vec![ProbeEvent::new(host, ProbePhase::TextGen, err.into())],
            ),
        }
    }

    async fn probe_render(&self, host: &str, port: u16) -> (Option<RenderService>, Vec<ProbeEvent>) {
        let endpoint = base_url(host, port);
        let mut events = Vec::new();

        let mut info = None;
        let mut last_error = None;
        for path in RENDER_INFO_PATHS {
            match self.get_json::<Value>(&format!("{}{}", endpoint, path)).await {
                Ok(value) => {
                    info = Some(value);
                    break;
                }
                Err(FetchError::Transport(reason)) => {
                    // Nothing listens on the port; the other paths won't answer either
                    last_error = Some(FetchError::Transport(reason));
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }

        let Some(info) = info else {
            let outcome = last_error.map(ProbeOutcome::from).unwrap_or(ProbeOutcome::Unreachable {
                reason: "no stats endpoint answered".to_string(),
            });
            events.push(ProbeEvent::new(host, ProbePhase::RenderInfo, outcome));
            return (None, events);
        };
        events.push(ProbeEvent::new(host, ProbePhase::RenderInfo, ProbeOutcome::Reachable));

        let version = info
            .pointer("/system/comfyui_version")
            .and_then(Value::as_str)
            .map(String::from);

        let catalog = match self
            .get_json::<Value>(&format!("{}/object_info", endpoint))
            .await
        {
            Ok(schema) => {
                events.push(ProbeEvent::new(
                    host,
                    ProbePhase::RenderCatalog,
                    ProbeOutcome::Reachable,
                ));
                extract_catalog(&schema)
            }
            Err(err) => {
                events.push(ProbeEvent::new(host, ProbePhase::RenderCatalog, err.into()));
                RenderCatalog::default()
            }
        };

        (
            Some(RenderService {
                endpoint,
                version,
                catalog,
            }),
            events,
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Base URL of a service on `host`, bracketing bare IPv6 addresses
pub fn base_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Walks the render daemon's node schema for loader file listings
pub fn extract_catalog(schema: &Value) -> RenderCatalog {
    let mut catalog = RenderCatalog::default();

    for (node_type, input, slot) in CATALOG_INPUTS {
        let Some(definition) = schema.pointer(&format!("/{}/input/required/{}", node_type, input)) else {
            continue;
        };

        let target = match slot {
            CatalogSlot::Checkpoint => &mut catalog.checkpoints,
            CatalogSlot::Lora => &mut catalog.loras,
            CatalogSlot::Vae => &mut catalog.vaes,
            CatalogSlot::Clip => &mut catalog.clips,
        };
        target.extend(option_names(definition));
    }

    for list in [
        &mut catalog.checkpoints,
        &mut catalog.loras,
        &mut catalog.vaes,
        &mut catalog.clips,
    ] {
        list.sort();
        list.dedup();
    }
    catalog
}

/// Names listed by a combo input: either `[[names...], {...}]` or
/// `["COMBO", {"options": [names...]}]`
fn option_names(definition: &Value) -> Vec<String> {
    let listed = definition
        .get(0)
        .and_then(Value::as_array)
        .or_else(|| definition.pointer("/1/options").and_then(Value::as_array));

    listed
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
