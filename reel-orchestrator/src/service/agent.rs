//! Agent Service
//!
//! Heartbeat board for self-reporting agents. Every heartbeat refreshes the
//! agent's node in the registry; records older than the TTL drop out of the
//! pull endpoint and the next health check marks their node offline.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reel_core::dto::agent::AgentRecord;
use thiserror::Error;

use crate::discovery::{AgentSource, ScanError};
use crate::registry::NodeRegistry;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

pub struct AgentBoard {
    /// Hostname -> latest record
    records: RwLock<HashMap<String, AgentRecord>>,
    ttl: Duration,
    registry: Arc<NodeRegistry>,
}

impl AgentBoard {
    pub fn new(registry: Arc<NodeRegistry>, ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
            registry,
        }
    }

    /// Stores an agent's record and upserts its node
    pub fn heartbeat(&self, mut record: AgentRecord) -> Result<AgentRecord> {
        validate_record(&record)?;
        record.last_seen = Some(Utc::now());

        let outcome = self.registry.upsert(record.to_node());
        tracing::debug!(
            "Heartbeat received from agent: {} ({:?})",
            record.hostname,
            outcome
        );

        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.hostname.clone(), record.clone());
        Ok(record)
    }

    /// Records heard from within the TTL, by hostname
    pub fn live(&self) -> Vec<AgentRecord> {
        self.live_at(Utc::now())
    }

    fn live_at(&self, now: DateTime<Utc>) -> Vec<AgentRecord> {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        let mut live: Vec<AgentRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.last_seen.is_some_and(|seen| now - seen <= ttl))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        live
    }
}

#[async_trait]
impl AgentSource for AgentBoard {
    async fn fetch_agents(&self) -> std::result::Result<Vec<AgentRecord>, ScanError> {
        Ok(self.live())
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_record(record: &AgentRecord) -> Result<()> {
    let hostname = record.hostname.trim();
    if hostname.is_empty() {
        return Err(AgentError::ValidationError(
            "Agent hostname cannot be empty".to_string(),
        ));
    }

    if hostname.len() > 255 {
        return Err(AgentError::ValidationError(
            "Agent hostname is too long (max 255 characters)".to_string(),
        ));
    }

    if hostname != record.hostname || hostname.contains(['/', '?', '#']) {
        return Err(AgentError::ValidationError(format!(
            "Agent hostname '{}' contains invalid characters",
            record.hostname
        )));
    }

    Ok(())
}
