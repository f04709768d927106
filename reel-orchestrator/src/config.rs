//! Coordinator configuration
//!
//! Runtime parameters come from environment variables. Model assignments and
//! cloud providers live in a separate TOML file because they are lists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reel_core::domain::assignment::{AssignmentTable, ModelAssignment};
use reel_core::domain::log::DEFAULT_LOG_RETENTION;
use reel_core::domain::node::{BackendKind, CapabilityState, Node, NodeOrigin};
use reel_core::dto::agent::{DEFAULT_RENDER_PORT, DEFAULT_TEXT_GEN_PORT};
use serde::Deserialize;
use thiserror::Error;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to
    pub bind_addr: String,

    /// Port probed for the text generation daemon
    pub text_gen_port: u16,

    /// Port probed for the render daemon
    pub render_port: u16,

    /// Per-request timeout of a single probe
    pub probe_timeout: Duration,

    /// Number of hosts probed concurrently
    pub scan_batch_size: usize,

    /// Pause between two scan batches
    pub scan_batch_pause: Duration,

    /// How often registered nodes are re-probed
    pub health_interval: Duration,

    /// Where the known-host set is persisted between runs
    pub known_hosts_path: Option<PathBuf>,

    /// Hosts always included in a full scan
    pub hosts: Vec<String>,

    /// Hostnames that resolve to machines worth probing
    pub host_aliases: Vec<String>,

    /// Private CIDR ranges enumerated by a full scan
    pub ip_ranges: Vec<String>,

    /// Remote coordination service to pull agent records from.
    /// When unset, this process serves the agent board itself.
    pub coordinator_url: Option<String>,

    /// How long an agent heartbeat stays valid
    pub agent_ttl: Duration,

    /// Entries kept in each run log
    pub log_retention: usize,

    /// Deadline of a single pipeline step
    pub step_timeout: Duration,

    /// Finished runs kept for inspection; older ones are dropped
    pub run_retention: usize,

    /// TOML file with `[[assignment]]` and `[[provider]]` tables
    pub pipeline_file: Option<PathBuf>,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - REEL_BIND_ADDR (default: 0.0.0.0:8080)
    /// - REEL_TEXT_GEN_PORT (default: 11434)
    /// - REEL_RENDER_PORT (default: 8188)
    /// - REEL_PROBE_TIMEOUT_MS (default: 1500)
    /// - REEL_SCAN_BATCH_SIZE (default: 32)
    /// - REEL_SCAN_BATCH_PAUSE_MS (default: 50)
    /// - REEL_HEALTH_INTERVAL (seconds, default: 60)
    /// - REEL_KNOWN_HOSTS_FILE
    /// - REEL_HOSTS, REEL_HOST_ALIASES, REEL_IP_RANGES (comma separated)
    /// - REEL_COORDINATOR_URL
    /// - REEL_AGENT_TTL (seconds, default: 90)
    /// - REEL_LOG_RETENTION (default: 500)
    /// - REEL_STEP_TIMEOUT (seconds, default: 600)
    /// - REEL_RUN_RETENTION (default: 100)
    /// - REEL_PIPELINE_FILE
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            bind_addr: std::env::var("REEL_BIND_ADDR").unwrap_or(defaults.bind_addr),
            text_gen_port: env_parse("REEL_TEXT_GEN_PORT")?.unwrap_or(defaults.text_gen_port),
            render_port: env_parse("REEL_RENDER_PORT")?.unwrap_or(defaults.render_port),
            probe_timeout: env_parse("REEL_PROBE_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_timeout),
            scan_batch_size: env_parse("REEL_SCAN_BATCH_SIZE")?
                .unwrap_or(defaults.scan_batch_size),
            scan_batch_pause: env_parse("REEL_SCAN_BATCH_PAUSE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.scan_batch_pause),
            health_interval: env_parse("REEL_HEALTH_INTERVAL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_interval),
            known_hosts_path: std::env::var("REEL_KNOWN_HOSTS_FILE")
                .ok()
                .map(PathBuf::from),
            hosts: env_list("REEL_HOSTS"),
            host_aliases: env_list("REEL_HOST_ALIASES"),
            ip_ranges: env_list("REEL_IP_RANGES"),
            coordinator_url: std::env::var("REEL_COORDINATOR_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            agent_ttl: env_parse("REEL_AGENT_TTL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.agent_ttl),
            log_retention: env_parse("REEL_LOG_RETENTION")?.unwrap_or(defaults.log_retention),
            step_timeout: env_parse("REEL_STEP_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.step_timeout),
            run_retention: env_parse("REEL_RUN_RETENTION")?.unwrap_or(defaults.run_retention),
            pipeline_file: std::env::var("REEL_PIPELINE_FILE").ok().map(PathBuf::from),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.text_gen_port == 0 || self.render_port == 0 {
            anyhow::bail!("probe ports must be greater than 0");
        }

        if self.probe_timeout.is_zero() {
            anyhow::bail!("probe_timeout must be greater than 0");
        }

        if self.scan_batch_size == 0 {
            anyhow::bail!("scan_batch_size must be greater than 0");
        }

        if self.health_interval.as_secs() == 0 {
            anyhow::bail!("health_interval must be greater than 0");
        }

        if self.log_retention == 0 {
            anyhow::bail!("log_retention must be greater than 0");
        }

        if self.step_timeout.as_secs() == 0 {
            anyhow::bail!("step_timeout must be greater than 0");
        }

        if self.run_retention == 0 {
            anyhow::bail!("run_retention must be greater than 0");
        }

        if let Some(url) = &self.coordinator_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            anyhow::bail!("coordinator_url must start with http:// or https://");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            text_gen_port: DEFAULT_TEXT_GEN_PORT,
            render_port: DEFAULT_RENDER_PORT,
            probe_timeout: Duration::from_millis(1500),
            scan_batch_size: 32,
            scan_batch_pause: Duration::from_millis(50),
            health_interval: Duration::from_secs(60),
            known_hosts_path: None,
            hosts: Vec::new(),
            host_aliases: Vec::new(),
            ip_ranges: Vec::new(),
            coordinator_url: None,
            agent_ttl: Duration::from_secs(90),
            log_retention: DEFAULT_LOG_RETENTION,
            step_timeout: Duration::from_secs(600),
            run_retention: 100,
            pipeline_file: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(None),
    }
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|raw| split_list(&raw))
        .unwrap_or_default()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Errors loading the pipeline file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("provider '{0}' is declared more than once")]
    DuplicateProvider(String),

    #[error("step '{0}' has more than one assignment")]
    DuplicateAssignment(String),
}

/// A cloud provider speaking the chat-completions protocol
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Models offered by this provider
    #[serde(default)]
    pub models: Vec<String>,
}

impl ProviderConfig {
    pub fn node_id(&self) -> String {
        format!("cloud:{}", self.name)
    }

    /// Registry entry for this provider
    pub fn to_node(&self) -> Node {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        Node::new(self.node_id(), base_url.clone(), NodeOrigin::Configured)
            .with_backend(BackendKind::Cloud {
                provider: self.name.clone(),
            })
            .with_text_gen(CapabilityState::online(base_url, self.models.clone()))
    }
}

/// Contents of the pipeline file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineFile {
    #[serde(default)]
    pub provider: Vec<ProviderConfig>,

    #[serde(default)]
    pub assignment: Vec<ModelAssignment>,
}

impl PipelineFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let file: PipelineFile = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;

        let mut seen = std::collections::HashSet::new();
        for provider in &file.provider {
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
        }

        let mut steps = std::collections::HashSet::new();
        for assignment in &file.assignment {
            if !steps.insert(assignment.step.as_str()) {
                return Err(ConfigError::DuplicateAssignment(assignment.step.clone()));
            }
        }

        Ok(file)
    }

    pub fn assignments(&self) -> AssignmentTable {
        self.assignment.iter().cloned().collect()
    }

    /// API keys of every provider whose key variable is set
    pub fn credentials(&self) -> HashMap<String, String> {
        self.provider
            .iter()
            .filter_map(|p| {
                let var = p.api_key_env.as_deref()?;
                let key = std::env::var(var).ok().filter(|k| !k.trim().is_empty())?;
                Some((p.name.clone(), key))
            })
            .collect()
    }
}
