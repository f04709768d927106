//! Capability router
//!
//! Picks the (node, model) a step runs on. Selection itself never touches
//! the registry; callers take a [`TargetLease`] to mark the capability busy
//! for the duration of the work.
//!
//! A candidate naming the any-node selector (`*`) is satisfied by any online node offering
//! its model, ranked by estimated wait and then least recent use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reel_core::domain::assignment::{AssignmentTable, ModelAssignment, ModelCandidate};
use reel_core::domain::node::{Capability, CapabilityStatus, Node};
use reel_core::domain::pipeline::StepKind;
use reel_core::dto::node::NodeQuery;
use thiserror::Error;
use tracing::debug;

use crate::registry::NodeRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no available target for step '{step}'")]
    NotAvailable { step: String },

    #[error("no online node offers {capability} with the requested model")]
    NoCapableNode {
        capability: Capability,
        model: Option<String>,
    },
}

/// A routed (node, model) pair
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Registry snapshot at selection time
    pub node: Node,
    pub capability: Capability,
    pub model: String,
}

impl Target {
    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    /// Base URL of the service behind the routed capability
    pub fn endpoint(&self) -> Option<&str> {
        self.node.capability(self.capability).endpoint.as_deref()
    }
}

/// Estimates how long new work would wait on a node
#[async_trait]
pub trait LoadProbe: Send + Sync {
    async fn estimated_wait(&self, node: &Node, capability: Capability) -> Option<Duration>;
}

pub struct CapabilityRouter {
    registry: Arc<NodeRegistry>,
    assignments: RwLock<AssignmentTable>,
    load: Option<Arc<dyn LoadProbe>>,

    /// Node id -> tick of its last lease
    last_used: Mutex<HashMap<String, u64>>,
    clock: AtomicU64,
}

impl CapabilityRouter {
    pub fn new(registry: Arc<NodeRegistry>, assignments: AssignmentTable) -> Self {
        Self {
            registry,
            assignments: RwLock::new(assignments),
            load: None,
            last_used: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    /// Use `probe` to rank nodes in [`select_any`](Self::select_any)
    pub fn with_load_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.load = Some(probe);
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Replaces the candidate list of one step
    pub fn set_assignment(&self, assignment: ModelAssignment) {
        self.assignments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(assignment);
    }

    pub fn assignments(&self) -> AssignmentTable {
        self.assignments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// First enabled candidate, by priority, whose node is online for the
    /// step's capability and offers the model
    pub async fn select_target(&self, step: &str) -> Result<Target, RouteError> {
        self.candidates(step)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RouteError::NotAvailable {
                step: step.to_string(),
            })
    }

    /// Selects and leases in one go, skipping candidates another run took
    /// in the meantime
    pub async fn acquire(&self, step: &str) -> Result<(Target, TargetLease), RouteError> {
        for target in self.candidates(step).await? {
            if let Some(lease) = self.lease(&target) {
                return Ok((target, lease));
            }
            debug!(step, node = %target.node.id, "Candidate was taken, trying next");
        }
        Err(RouteError::NotAvailable {
            step: step.to_string(),
        })
    }

    /// Any online node offering `capability` (and `model`, if given)
    ///
    /// Prefers the lowest estimated wait when a load probe is configured,
    /// then the least recently used node.
    pub async fn select_any(
        &self,
        capability: Capability,
        model: Option<&str>,
    ) -> Result<Target, RouteError> {
        self.rank_any(capability, model)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| RouteError::NoCapableNode {
                capability,
                model: model.map(String::from),
            })
    }

    async fn rank_any(&self, capability: Capability, model: Option<&str>) -> Vec<Target> {
        let eligible: Vec<Target> = self
            .registry
            .list(&NodeQuery {
                capability: Some(capability),
                status: Some(CapabilityStatus::Online),
            })
            .into_iter()
            .filter_map(|node| {
                let state = node.capability(capability);
                let model = match model {
                    Some(m) if state.has_model(m) => m.to_string(),
                    Some(_) => return None,
                    None => state.models.first()?.clone(),
                };
                Some(Target {
                    node,
                    capability,
                    model,
                })
            })
            .collect();

        let waits: Vec<Option<Duration>> = match &self.load {
            Some(probe) => {
                join_all(
                    eligible
                        .iter()
                        .map(|t| probe.estimated_wait(&t.node, capability)),
                )
                .await
            }
            None => vec![None; eligible.len()],
        };

        let last_used = self.last_used.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ranked: Vec<(Duration, u64, Target)> = eligible
            .into_iter()
            .zip(waits)
            .map(|(target, wait)| {
                let used = last_used.get(&target.node.id).copied().unwrap_or(0);
                (wait.unwrap_or(Duration::MAX), used, target)
            })
            .collect();
        drop(last_used);

        // Stable: equal rank keeps registry (id) order
        ranked.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        ranked.into_iter().map(|(_, _, target)| target).collect()
    }

    /// Marks the target's capability busy until the lease is dropped;
    /// `None` when it is no longer online
    pub fn lease(&self, target: &Target) -> Option<TargetLease> {
        if !self.registry.acquire(&target.node.id, target.capability) {
            return None;
        }

        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.node.id.clone(), tick);

        Some(TargetLease {
            registry: Arc::clone(&self.registry),
            node_id: target.node.id.clone(),
            capability: target.capability,
        })
    }

    async fn candidates(&self, step: &str) -> Result<Vec<Target>, RouteError> {
        let capability = step
            .parse::<StepKind>()
            .map(|kind| kind.capability())
            .unwrap_or(Capability::TextGen);

        let ordered: Vec<ModelCandidate> = {
            let assignments = self.assignments.read().unwrap_or_else(PoisonError::into_inner);
            let assignment = assignments
                .get(step)
                .ok_or_else(|| RouteError::NotAvailable {
                    step: step.to_string(),
                })?;
            assignment.ordered().into_iter().cloned().collect()
        };

        let mut targets = Vec::new();
        for candidate in ordered {
            if candidate.is_any_node() {
                targets.extend(self.rank_any(capability, Some(&candidate.model)).await);
                continue;
            }

            // Ids merged into another entry still resolve through its aliases
            let Some(node) = self.registry.get(&candidate.node_id).or_else(|| {
                self.registry
                    .find_by_address(&candidate.node_id)
                    .and_then(|id| self.registry.get(&id))
            }) else {
                continue;
            };

            let state = node.capability(capability);
            if state.is_online() && state.has_model(&candidate.model) {
                targets.push(Target {
                    node,
                    capability,
                    model: candidate.model,
                });
            }
        }
        Ok(targets)
    }
}

/// Busy marker on one node capability, released on drop
#[derive(Debug)]
pub struct TargetLease {
    registry: Arc<NodeRegistry>,
    node_id: String,
    capability: Capability,
}

impl TargetLease {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        self.registry.release(&self.node_id, self.capability);
    }
}
