//! Node registry
//!
//! In-memory catalog of compute nodes shared by the scanner, the health
//! monitor, the agent board and every running pipeline. All access goes
//! through short lock sections and returns owned copies.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use reel_core::domain::node::{
    Capability, CapabilityStatus, HostKind, Node, NodeOrigin, RenderCatalog,
};
use reel_core::dto::node::NodeQuery;
use tracing::debug;

/// What an upsert did to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// A new entry was created
    Inserted(String),

    /// An existing entry was refreshed with the new observation
    Updated(String),

    /// The observation was merged into another entry for the same machine
    Merged { canonical: String, alias: String },

    /// A live agent owns the address; only the probe timestamp was refreshed
    DeferredToAgent(String),
}

impl Upsert {
    /// Id of the entry that now represents the observed node
    pub fn node_id(&self) -> &str {
        match self {
            Upsert::Inserted(id) | Upsert::Updated(id) | Upsert::DeferredToAgent(id) => id,
            Upsert::Merged { canonical, .. } => canonical,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    leases: HashSet<(String, Capability)>,
}

/// Thread-safe node catalog
#[derive(Debug, Default)]
pub struct NodeRegistry {
    inner: RwLock<Inner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a node observation into the registry
    ///
    /// Capability flags and models of an existing entry are replaced by the
    /// newer observation. A capability held by a lease stays busy. A probed
    /// capability that stopped answering keeps its last catalog, offline.
    pub fn upsert(&self, mut node: Node) -> Upsert {
        node.normalize();
        let mut inner = self.write();

        match node.origin {
            NodeOrigin::Discovered => {
                if let Some(agent) = inner.nodes.values_mut().find(|n| {
                    n.origin == NodeOrigin::Agent && n.is_online() && n.answers_to(&node.address)
                }) {
                    agent.last_probed_at = node.last_probed_at;
                    return Upsert::DeferredToAgent(agent.id.clone());
                }

                if let Some(outcome) = inner.merge_duplicate(&node) {
                    return outcome;
                }
            }
            NodeOrigin::Agent => inner.retire_probed_twins(&node),
            NodeOrigin::Configured => {}
        }

        let id = node.id.clone();
        let outcome = match inner.nodes.remove(&id) {
            Some(existing) => {
                for alias in &existing.aliases {
                    if *alias != node.address && !node.aliases.contains(alias) {
                        node.aliases.push(alias.clone());
                    }
                }
                if node.origin == NodeOrigin::Discovered {
                    keep_lost_capabilities(&mut node, &existing);
                }
                if node.render_catalog == RenderCatalog::default() && node.render.available {
                    node.render_catalog = existing.render_catalog;
                }
                Upsert::Updated(id.clone())
            }
            None => Upsert::Inserted(id.clone()),
        };

        inner.apply_leases(&mut node);
        inner.nodes.insert(id, node);
        outcome
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.read().nodes.get(id).cloned()
    }

    /// Id of the entry reachable at `address`, if any
    pub fn find_by_address(&self, address: &str) -> Option<String> {
        let inner = self.read();
        if inner.nodes.contains_key(address) {
            return Some(address.to_string());
        }
        inner
            .nodes
            .values()
            .find(|n| n.answers_to(address))
            .map(|n| n.id.clone())
    }

    /// Nodes matching the filter, ordered by id
    pub fn list(&self, filter: &NodeQuery) -> Vec<Node> {
        let inner = self.read();
        let mut nodes: Vec<Node> = inner
            .nodes
            .values()
            .filter(|n| matches_query(n, filter))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn all(&self) -> Vec<Node> {
        self.list(&NodeQuery::default())
    }

    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().nodes.is_empty()
    }

    /// Flips every probed node absent from `seen` to offline
    ///
    /// Configured nodes are not subject to scanning and are left alone.
    /// Returns the ids that went offline.
    pub fn mark_stale(&self, seen: &HashSet<String>) -> Vec<String> {
        let mut inner = self.write();
        let mut changed: Vec<String> = inner
            .nodes
            .values_mut()
            .filter(|n| n.origin != NodeOrigin::Configured && !seen.contains(&n.id))
            .filter(|n| n.is_online() || has_busy(n))
            .map(|n| {
                n.mark_offline();
                n.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    /// Marks one node offline; false when the id is unknown
    pub fn mark_offline(&self, id: &str) -> bool {
        match self.write().nodes.get_mut(id) {
            Some(node) => {
                node.mark_offline();
                true
            }
            None => false,
        }
    }

    /// Takes exclusive use of an online capability, marking it busy
    pub fn acquire(&self, id: &str, capability: Capability) -> bool {
        let mut inner = self.write();
        let Some(node) = inner.nodes.get_mut(id) else {
            return false;
        };
        let state = node.capability_mut(capability);
        if !state.is_online() {
            return false;
        }
        state.status = CapabilityStatus::Busy;
        inner.leases.insert((id.to_string(), capability));
        true
    }

    /// Ends a lease; a busy capability goes back to online unless an agent
    /// still reports a job on the node
    pub fn release(&self, id: &str, capability: Capability) {
        let mut inner = self.write();
        inner.leases.remove(&(id.to_string(), capability));
        if let Some(node) = inner.nodes.get_mut(id) {
            let reported_busy = node.current_job.is_some();
            let state = node.capability_mut(capability);
            if state.status == CapabilityStatus::Busy && !reported_busy {
                state.status = CapabilityStatus::Online;
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    /// Folds a private-LAN observation into an online loopback entry with
    /// the same catalog
    ///
    /// Only the entry of the address just probed is ever removed; a LAN
    /// entry that is leased stays separate until it is released.
    fn merge_duplicate(&mut self, node: &Node) -> Option<Upsert> {
        if !node.has_any_capability() || node.host_kind() != HostKind::Private {
            return None;
        }
        if self.leases.iter().any(|(id, _)| *id == node.id) {
            return None;
        }

        let canonical = self
            .nodes
            .values()
            .find(|n| {
                n.origin == NodeOrigin::Discovered
                    && n.host_kind() == HostKind::Loopback
                    && n.id != node.id
                    && n.is_online()
                    && n.same_catalog(node)
            })?
            .id
            .clone();

        let alias = node.address.clone();
        let previous = self.nodes.remove(&node.id);
        if let Some(entry) = self.nodes.get_mut(&canonical) {
            let carried = previous.into_iter().flat_map(|p| p.aliases);
            for addr in std::iter::once(alias.clone()).chain(carried) {
                if addr != entry.address && !entry.aliases.contains(&addr) {
                    entry.aliases.push(addr);
                }
            }
            entry.last_probed_at = node.last_probed_at;
        }
        Some(Upsert::Merged { canonical, alias })
    }

    /// Probed entries for one of the agent's addresses go offline
    fn retire_probed_twins(&mut self, agent: &Node) {
        for node in self.nodes.values_mut().filter(|n| {
            n.origin == NodeOrigin::Discovered
                && std::iter::once(&n.address)
                    .chain(n.aliases.iter())
                    .any(|addr| agent.answers_to(addr))
        }) {
            if node.is_online() {
                debug!(node = %node.id, agent = %agent.id, "Probed entry superseded by agent");
            }
            node.mark_offline();
        }
    }

    fn apply_leases(&self, node: &mut Node) {
        let id = node.id.clone();
        for capability in Capability::ALL {
            let leased = self.leases.contains(&(id.clone(), capability));
            let state = node.capability_mut(capability);
            if leased && state.status == CapabilityStatus::Online {
                state.status = CapabilityStatus::Busy;
            }
        }
    }
}

/// A daemon that stopped answering keeps its last catalog, offline
fn keep_lost_capabilities(node: &mut Node, existing: &Node) {
    for capability in Capability::ALL {
        let previous = existing.capability(capability);
        if previous.available && !node.capability(capability).available {
            let state = node.capability_mut(capability);
            *state = previous.clone();
            state.status = CapabilityStatus::Offline;
        }
    }
}

fn has_busy(node: &Node) -> bool {
    Capability::ALL
        .into_iter()
        .any(|c| node.capability(c).status == CapabilityStatus::Busy)
}

fn matches_query(node: &Node, filter: &NodeQuery) -> bool {
    match (filter.capability, filter.status) {
        (None, None) => true,
        (Some(capability), None) => node.capability(capability).available,
        (Some(capability), Some(status)) => {
            let state = node.capability(capability);
            state.available && state.status == status
        }
        (None, Some(status)) => {
            let mut offered = Capability::ALL
                .into_iter()
                .map(|c| node.capability(c))
                .filter(|s| s.available)
                .peekable();
            if offered.peek().is_none() {
                return status == CapabilityStatus::Offline;
            }
            offered.any(|s| s.status == status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::domain::node::CapabilityState;

    fn text_node(host: &str, models: &[&str]) -> Node {
        Node::new(host, host, NodeOrigin::Discovered).with_text_gen(CapabilityState::online(
            format!("http://{}:11434", host),
            models.iter().map(|m| m.to_string()).collect(),
        ))
    }

    #[test]
    fn test_upsert_inserts_then_updates() {
        let registry = NodeRegistry::new();
        assert_eq!(
            registry.upsert(text_node("10.0.0.5", &["llama3"])),
            Upsert::Inserted("10.0.0.5".to_string())
        );
        assert_eq!(
            registry.upsert(text_node("10.0.0.5", &["mistral"])),
            Upsert::Updated("10.0.0.5".to_string())
        );

        let node = registry.get("10.0.0.5").unwrap();
        assert_eq!(node.text_gen.models, vec!["mistral".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_loopback_and_lan_with_same_catalog_merge() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("127.0.0.1", &["llama3", "mistral"]));
        let outcome = registry.upsert(text_node("192.168.1.20", &["mistral", "llama3"]));

        assert_eq!(
            outcome,
            Upsert::Merged {
                canonical: "127.0.0.1".to_string(),
                alias: "192.168.1.20".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
        let node = registry.get("127.0.0.1").unwrap();
        assert_eq!(node.aliases, vec!["192.168.1.20".to_string()]);
        assert_eq!(
            registry.find_by_address("192.168.1.20").as_deref(),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn test_lan_seen_first_folds_on_its_next_probe() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("192.168.1.20", &["llama3"]));

        // A loopback observation never removes an existing entry
        let outcome = registry.upsert(text_node("127.0.0.1", &["llama3"]));
        assert_eq!(outcome, Upsert::Inserted("127.0.0.1".to_string()));
        assert_eq!(registry.len(), 2);

        let outcome = registry.upsert(text_node("192.168.1.20", &["llama3"]));
        assert_eq!(outcome.node_id(), "127.0.0.1");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("192.168.1.20").is_none());
        assert!(registry.get("127.0.0.1").unwrap().answers_to("192.168.1.20"));
    }

    #[test]
    fn test_offline_lan_entry_survives_loopback_probe() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("10.9.9.9", &["llama3"]));
        registry.mark_offline("10.9.9.9");

        registry.upsert(text_node("127.0.0.1", &["llama3"]));

        let lan = registry.get("10.9.9.9").unwrap();
        assert!(!lan.is_online());
        assert!(lan.text_gen.has_model("llama3"));
        assert!(!registry.get("127.0.0.1").unwrap().answers_to("10.9.9.9"));
    }

    #[test]
    fn test_lan_does_not_fold_into_offline_loopback() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("127.0.0.1", &["llama3"]));
        registry.mark_offline("127.0.0.1");

        let outcome = registry.upsert(text_node("192.168.1.20", &["llama3"]));
        assert_eq!(outcome, Upsert::Inserted("192.168.1.20".to_string()));
        assert!(registry.get("192.168.1.20").unwrap().is_online());
    }

    #[test]
    fn test_silent_daemon_keeps_catalog_offline() {
        let registry = NodeRegistry::new();
        registry.upsert(
            text_node("10.0.0.5", &["llama3"]).with_render(CapabilityState::online(
                "http://10.0.0.5:8188",
                vec!["sdxl.safetensors".to_string()],
            )),
        );

        // Render port closed, text still up
        registry.upsert(text_node("10.0.0.5", &["llama3"]));

        let node = registry.get("10.0.0.5").unwrap();
        assert!(node.text_gen.is_online());
        assert!(node.render.available);
        assert_eq!(node.render.status, CapabilityStatus::Offline);
        assert!(node.render.has_model("sdxl.safetensors"));
        assert_eq!(node.render.endpoint.as_deref(), Some("http://10.0.0.5:8188"));
    }

    #[test]
    fn test_different_catalogs_stay_separate() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("127.0.0.1", &["llama3"]));
        registry.upsert(text_node("192.168.1.20", &["mistral"]));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_empty_catalogs_do_not_merge() {
        let registry = NodeRegistry::new();
        registry.upsert(Node::new("127.0.0.1", "127.0.0.1", NodeOrigin::Discovered));
        registry.upsert(Node::new("192.168.1.20", "192.168.1.20", NodeOrigin::Discovered));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_agent_data_wins_over_probe() {
        let registry = NodeRegistry::new();
        let mut agent = Node::new("agent:studio", "192.168.1.40", NodeOrigin::Agent).with_text_gen(
            CapabilityState::online("http://192.168.1.40:11434", vec!["qwen".to_string()]),
        );
        agent.aliases.push("studio".to_string());
        registry.upsert(agent);

        let outcome = registry.upsert(text_node("192.168.1.40", &["llama3"]));
        assert_eq!(outcome, Upsert::DeferredToAgent("agent:studio".to_string()));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("agent:studio").unwrap().text_gen.has_model("qwen"));
    }

    #[test]
    fn test_agent_heartbeat_retires_probed_entry() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("192.168.1.40", &["qwen"]));

        let agent = Node::new("agent:studio", "192.168.1.40", NodeOrigin::Agent).with_text_gen(
            CapabilityState::online("http://192.168.1.40:11434", vec!["qwen".to_string()]),
        );
        registry.upsert(agent);

        let online: Vec<String> = registry
            .all()
            .into_iter()
            .filter(|n| n.is_online())
            .map(|n| n.id)
            .collect();
        assert_eq!(online, vec!["agent:studio".to_string()]);

        // Kept, not deleted
        assert!(registry.get("192.168.1.40").unwrap().text_gen.has_model("qwen"));
    }

    #[test]
    fn test_mark_stale_keeps_entries() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("10.0.0.5", &["llama3"]));
        registry.upsert(text_node("10.0.0.6", &["llama3"]));

        let seen: HashSet<String> = ["10.0.0.5".to_string()].into_iter().collect();
        assert_eq!(registry.mark_stale(&seen), vec!["10.0.0.6".to_string()]);

        let stale = registry.get("10.0.0.6").unwrap();
        assert!(!stale.is_online());
        assert!(stale.text_gen.has_model("llama3"));
        assert!(registry.get("10.0.0.5").unwrap().is_online());
    }

    #[test]
    fn test_list_filters() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("10.0.0.5", &["llama3"]));
        registry.upsert(text_node("10.0.0.6", &["llama3"]));
        registry.mark_offline("10.0.0.6");

        let online = registry.list(&NodeQuery {
            capability: Some(Capability::TextGen),
            status: Some(CapabilityStatus::Online),
        });
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, "10.0.0.5");

        let render = registry.list(&NodeQuery {
            capability: Some(Capability::Render),
            status: None,
        });
        assert!(render.is_empty());

        let offline = registry.list(&NodeQuery {
            capability: None,
            status: Some(CapabilityStatus::Offline),
        });
        assert_eq!(offline[0].id, "10.0.0.6");
    }

    #[test]
    fn test_lease_survives_reprobe() {
        let registry = NodeRegistry::new();
        registry.upsert(text_node("10.0.0.5", &["llama3"]));

        assert!(registry.acquire("10.0.0.5", Capability::TextGen));
        assert!(!registry.acquire("10.0.0.5", Capability::TextGen));

        registry.upsert(text_node("10.0.0.5", &["llama3"]));
        assert_eq!(
            registry.get("10.0.0.5").unwrap().text_gen.status,
            CapabilityStatus::Busy
        );

        registry.release("10.0.0.5", Capability::TextGen);
        assert!(registry.get("10.0.0.5").unwrap().text_gen.is_online());
    }
}
