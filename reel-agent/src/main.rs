//! Reel Agent
//!
//! Runs on a worker machine and reports the text generation and render
//! daemons it finds there to the coordinator.
//!
//! Architecture:
//! - Configuration: Load settings from environment
//! - Report: Probe the local daemons and build the agent record
//! - Heartbeat: Push the record to the coordinator on an interval
//!
//! A machine that stops sending heartbeats ages out of the coordinator's
//! agent list and its node is marked offline by the next health check.

mod config;
mod heartbeat;
mod report;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::heartbeat::Backoff;
use crate::report::Reporter;
use reel_client::CoordinatorClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel_agent=info,reel_orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Reel Agent");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: hostname={}, coordinator_url={}",
        config.hostname, config.coordinator_url
    );

    let client = CoordinatorClient::with_client(
        config.coordinator_url.clone(),
        reqwest::Client::builder()
            .timeout(config.heartbeat_interval)
            .build()
            .context("Failed to build HTTP client")?,
    );
    let interval = config.heartbeat_interval;
    let reporter = Reporter::new(config).context("Failed to initialize local prober")?;

    info!("Heartbeat interval: {:?}", interval);

    tokio::select! {
        result = heartbeat::run(&reporter, &client, interval, Backoff::default()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}
