//! Health monitor
//!
//! Periodically re-probes every registered node and publishes a
//! `StatusChange` for each capability whose status moved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reel_core::domain::node::{Capability, CapabilityStatus, Node, NodeOrigin};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::discovery::Scanner;
use crate::registry::NodeRegistry;

const CHANNEL_CAPACITY: usize = 256;

/// One capability of one node changed status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub node_id: String,
    pub capability: Capability,
    pub from: CapabilityStatus,
    pub to: CapabilityStatus,
    pub at: DateTime<Utc>,
}

pub struct HealthMonitor {
    scanner: Arc<Scanner>,
    interval: Duration,
    changes: broadcast::Sender<StatusChange>,
}

impl HealthMonitor {
    pub fn new(scanner: Arc<Scanner>, interval: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            scanner,
            interval,
            changes,
        }
    }

    /// Receives every status change published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    fn registry(&self) -> &Arc<NodeRegistry> {
        self.scanner.registry()
    }

    /// Re-probes all discovered nodes and refreshes agents once
    pub async fn check_once(&self) -> Vec<StatusChange> {
        let before = snapshot(&self.registry().all());

        let hosts: Vec<String> = self
            .registry()
            .all()
            .into_iter()
            .filter(|n| n.origin == NodeOrigin::Discovered)
            .map(|n| n.address)
            .collect();
        debug!("Health check over {} host(s)", hosts.len());
        self.scanner.recheck(hosts, false).await;

        let after = snapshot(&self.registry().all());
        let changes = diff(&before, &after);

        for change in &changes {
            info!(
                node = %change.node_id,
                capability = %change.capability,
                from = %change.from,
                to = %change.to,
                "Node status changed"
            );
            // No receivers is fine
            let _ = self.changes.send(change.clone());
        }
        changes
    }

    /// Runs health checks on a fixed interval until `shutdown` fires
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting health monitor (interval: {:?})", self.interval);
            let mut ticker = time::interval(self.interval);
            // The first tick completes immediately; startup already scanned
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Health monitor stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.check_once().await;
                    }
                }
            }
        })
    }
}

type Snapshot = HashMap<(String, Capability), CapabilityStatus>;

fn snapshot(nodes: &[Node]) -> Snapshot {
    nodes
        .iter()
        .flat_map(|node| {
            Capability::ALL.into_iter().filter_map(move |capability| {
                let state = node.capability(capability);
                state
                    .available
                    .then(|| ((node.id.clone(), capability), state.status))
            })
        })
        .collect()
}

fn diff(before: &Snapshot, after: &Snapshot) -> Vec<StatusChange> {
    let now = Utc::now();
    let change = |(node_id, capability): &(String, Capability),
                  from: CapabilityStatus,
                  to: CapabilityStatus| {
        (from != to).then(|| StatusChange {
            node_id: node_id.clone(),
            capability: *capability,
            from,
            to,
            at: now,
        })
    };

    // A capability that appeared counts as coming from offline, one that
    // vanished as going offline
    let moved = after.iter().filter_map(|(key, to)| {
        let from = before.get(key).copied().unwrap_or(CapabilityStatus::Offline);
        change(key, from, *to)
    });
    let vanished = before
        .iter()
        .filter(|(key, _)| !after.contains_key(*key))
        .filter_map(|(key, from)| change(key, *from, CapabilityStatus::Offline));

    let mut changes: Vec<StatusChange> = moved.chain(vanished).collect();

    changes.sort_by(|a, b| {
        a.node_id
            .cmp(&b.node_id)
            .then_with(|| a.capability.to_string().cmp(&b.capability.to_string()))
    });
    changes
}
