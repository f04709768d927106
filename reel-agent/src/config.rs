//! Agent configuration
//!
//! Defines where the agent reports to, how often, and which local ports its
//! text generation and render daemons listen on.

use std::time::Duration;

use reel_core::dto::agent::{DEFAULT_RENDER_PORT, DEFAULT_TEXT_GEN_PORT};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name the agent reports under, unique per machine
    pub hostname: String,

    /// Coordinator base URL (e.g., "http://192.168.1.10:8080")
    pub coordinator_url: String,

    /// Addresses advertised to the coordinator, preferred first
    pub ips: Vec<String>,

    /// How often to push a heartbeat
    pub heartbeat_interval: Duration,

    /// Timeout of each local probe request
    pub probe_timeout: Duration,

    pub text_gen_port: u16,
    pub render_port: u16,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(hostname: String, coordinator_url: String) -> Self {
        Self {
            hostname,
            coordinator_url,
            ips: Vec::new(),
            heartbeat_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
            text_gen_port: DEFAULT_TEXT_GEN_PORT,
            render_port: DEFAULT_RENDER_PORT,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - AGENT_HOSTNAME (optional, falls back to HOSTNAME)
    /// - COORDINATOR_URL (required)
    /// - AGENT_IPS (optional, comma separated)
    /// - HEARTBEAT_INTERVAL (optional, seconds, default: 30)
    /// - PROBE_TIMEOUT_MS (optional, default: 2000)
    /// - TEXT_GEN_PORT (optional, default: 11434)
    /// - RENDER_PORT (optional, default: 8188)
    pub fn from_env() -> anyhow::Result<Self> {
        let hostname = std::env::var("AGENT_HOSTNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .map_err(|_| anyhow::anyhow!("AGENT_HOSTNAME environment variable not set"))?;

        let coordinator_url = std::env::var("COORDINATOR_URL")
            .map_err(|_| anyhow::anyhow!("COORDINATOR_URL environment variable not set"))?;

        let mut config = Self::new(hostname, coordinator_url);

        if let Ok(ips) = std::env::var("AGENT_IPS") {
            config.ips = parse_list(&ips);
        }

        if let Some(secs) = parse_env::<u64>("HEARTBEAT_INTERVAL") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_env::<u64>("PROBE_TIMEOUT_MS") {
            config.probe_timeout = Duration::from_millis(ms);
        }

        if let Some(port) = parse_env("TEXT_GEN_PORT") {
            config.text_gen_port = port;
        }

        if let Some(port) = parse_env("RENDER_PORT") {
            config.render_port = port;
        }

        Ok(config)
    }

    /// Validates configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hostname.trim().is_empty() {
            anyhow::bail!("hostname cannot be empty");
        }

        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            anyhow::bail!("coordinator_url must start with http:// or https://");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        if self.probe_timeout.is_zero() {
            anyhow::bail!("probe_timeout must be greater than 0");
        }

        if self.text_gen_port == 0 || self.render_port == 0 {
            anyhow::bail!("service ports must be greater than 0");
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
