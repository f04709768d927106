//! Heartbeat loop
//!
//! The first heartbeat is retried with exponential backoff, since the
//! coordinator may still be starting. Later heartbeats are best effort: a
//! failed push is logged and the next tick tries again.

use std::time::Duration;

use reel_client::CoordinatorClient;
use reel_core::dto::agent::AgentRecord;
use tracing::{debug, error, info, warn};

use crate::report::Reporter;

/// Retry schedule of the first heartbeat
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Push a record, retrying with exponential backoff
pub async fn send_with_retry(
    client: &CoordinatorClient,
    record: &AgentRecord,
    backoff: Backoff,
) -> anyhow::Result<()> {
    let mut attempt = 0;
    let mut delay = backoff.initial_delay;

    loop {
        attempt += 1;

        match client.send_heartbeat(record).await {
            Ok(()) => {
                if attempt > 1 {
                    info!("Reached coordinator after {} attempt(s)", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= backoff.max_retries {
                    error!(
                        "Failed to reach coordinator after {} attempts",
                        backoff.max_retries
                    );
                    return Err(anyhow::anyhow!(
                        "Failed to send heartbeat to coordinator: {}",
                        e
                    ));
                }

                warn!(
                    "Failed to send heartbeat (attempt {}/{}): {}",
                    attempt, backoff.max_retries, e
                );
                warn!("Retrying in {:?}...", delay);

                tokio::time::sleep(delay).await;

                delay = (delay * 2).min(backoff.max_delay);
            }
        }
    }
}

/// Probe and push forever, one heartbeat per `interval`
pub async fn run(
    reporter: &Reporter,
    client: &CoordinatorClient,
    interval: Duration,
    backoff: Backoff,
) -> anyhow::Result<()> {
    let first = reporter.snapshot().await;
    send_with_retry(client, &first, backoff).await?;
    info!(
        "Registered with coordinator as {} (text_gen={}, render={})",
        first.node_id(),
        first.text_gen.available,
        first.render.available
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let record = reporter.snapshot().await;
        match client.send_heartbeat(&record).await {
            Ok(()) => debug!(current_job = ?record.current_job, "Heartbeat sent"),
            Err(e) => warn!("Failed to send heartbeat: {}", e),
        }
    }
}
