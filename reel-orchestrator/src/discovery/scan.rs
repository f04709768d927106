//! Network scans
//!
//! Candidates are probed in fixed-size batches joined concurrently, with a
//! short pause between batches. Results are upserted into the registry and
//! the known-host set is persisted for later quick scans.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use reel_core::domain::node::{HostKind, NodeOrigin};
use reel_core::dto::node::{NodeQuery, ScanSummary};
use tracing::{info, warn};

use super::agents::AgentSource;
use super::known_hosts::KnownHosts;
use super::probe::{ProbeEvent, ProbeOutcome, ProbePhase, ProbePorts, ProbeResult, Prober};
use super::{ScanError, ranges};
use crate::config::Config;
use crate::registry::NodeRegistry;

/// Address always included in quick scans
pub const LOCALHOST: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub ports: ProbePorts,
    pub batch_size: usize,
    pub batch_pause: Duration,

    /// Explicit hosts of every full scan
    pub hosts: Vec<String>,
    pub host_aliases: Vec<String>,
    pub ip_ranges: Vec<String>,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ports: ProbePorts {
                text_gen: config.text_gen_port,
                render: config.render_port,
            },
            batch_size: config.scan_batch_size,
            batch_pause: config.scan_batch_pause,
            hosts: config.hosts.clone(),
            host_aliases: config.host_aliases.clone(),
            ip_ranges: config.ip_ranges.clone(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            ports: ProbePorts::default(),
            batch_size: 32,
            batch_pause: Duration::from_millis(50),
            hosts: Vec::new(),
            host_aliases: Vec::new(),
            ip_ranges: Vec::new(),
        }
    }
}

/// Everything a scan observed
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub quick: bool,
    pub hosts_probed: usize,
    pub results: Vec<ProbeResult>,
    pub events: Vec<ProbeEvent>,

    /// Registry ids of nodes that answered (probes and agents)
    pub nodes_found: Vec<String>,
    pub nodes_marked_offline: Vec<String>,
    pub duration: Duration,
}

impl ScanReport {
    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            quick: self.quick,
            hosts_probed: self.hosts_probed,
            nodes_found: self.nodes_found.clone(),
            nodes_marked_offline: self.nodes_marked_offline.clone(),
            duration_ms: self.duration.as_millis() as u64,
        }
    }
}

pub struct Scanner {
    prober: Prober,
    registry: Arc<NodeRegistry>,
    known_hosts: Arc<KnownHosts>,
    agents: Option<Arc<dyn AgentSource>>,
    settings: ScanSettings,
}

impl Scanner {
    pub fn new(
        prober: Prober,
        registry: Arc<NodeRegistry>,
        known_hosts: Arc<KnownHosts>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            prober,
            registry,
            known_hosts,
            agents: None,
            settings,
        }
    }

    /// Pull agent records from `source` during scans
    pub fn with_agent_source(mut self, source: Arc<dyn AgentSource>) -> Self {
        self.agents = Some(source);
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Full scan over configured hosts, known hosts, localhost and ranges
    pub async fn full_scan(&self) -> Result<ScanReport, ScanError> {
        let mut hosts = self.settings.hosts.clone();
        hosts.extend(self.known_hosts.hosts());
        hosts.push(LOCALHOST.to_string());

        let ip_ranges = self.settings.ip_ranges.clone();
        self.scan(&hosts, &ip_ranges).await
    }

    /// Probes `hosts`, the configured hostname aliases and every address
    /// of `ip_ranges`
    ///
    /// Nodes that neither answered nor were reported by an agent go offline.
    pub async fn scan(&self, hosts: &[String], ip_ranges: &[String]) -> Result<ScanReport, ScanError> {
        let started = Instant::now();

        let mut candidates: Vec<String> = hosts
            .iter()
            .chain(self.settings.host_aliases.iter())
            .cloned()
            .collect();
        for range in ip_ranges {
            candidates.extend(ranges::expand(range)?.into_iter().map(|ip| ip.to_string()));
        }
        let candidates = dedup(candidates);

        info!(
            hosts = candidates.len(),
            ranges = ip_ranges.len(),
            "Starting full scan"
        );

        let (results, mut events) = self.probe_all(&candidates).await;

        let mut seen = HashSet::new();
        let mut nodes_found = Vec::new();
        for result in loopback_first(&results) {
            let outcome = self.registry.upsert(result.to_node());
            if seen.insert(outcome.node_id().to_string()) {
                nodes_found.push(outcome.node_id().to_string());
            }
        }

        if let Some(agent_ids) = self.pull_agents(&mut events).await {
            for id in agent_ids {
                if seen.insert(id.clone()) {
                    nodes_found.push(id);
                }
            }
        }

        let nodes_marked_offline = self.registry.mark_stale(&seen);
        self.remember(&results);

        let report = ScanReport {
            quick: false,
            hosts_probed: candidates.len(),
            results,
            events,
            nodes_found,
            nodes_marked_offline,
            duration: started.elapsed(),
        };
        info!(
            found = report.nodes_found.len(),
            offline = report.nodes_marked_offline.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Full scan complete"
        );
        Ok(report)
    }

    /// Re-probes the known hosts plus localhost
    pub async fn quick_scan(&self) -> ScanReport {
        let mut hosts = vec![LOCALHOST.to_string()];
        hosts.extend(self.known_hosts.hosts());
        self.recheck(hosts, true).await
    }

    /// Re-probes `hosts`; those that stay silent are marked offline
    ///
    /// Agent records are refreshed too, and agents that dropped out of the
    /// live set go offline.
    pub async fn recheck(&self, hosts: Vec<String>, quick: bool) -> ScanReport {
        let started = Instant::now();
        let candidates = dedup(hosts);

        let (results, mut events) = self.probe_all(&candidates).await;

        let mut seen = HashSet::new();
        let mut nodes_found = Vec::new();
        let mut answered = HashSet::new();
        for result in loopback_first(&results) {
            answered.insert(result.host.clone());
            let outcome = self.registry.upsert(result.to_node());
            if seen.insert(outcome.node_id().to_string()) {
                nodes_found.push(outcome.node_id().to_string());
            }
        }

        let mut nodes_marked_offline = Vec::new();
        for host in candidates.iter().filter(|h| !answered.contains(*h)) {
            let Some(id) = self.registry.find_by_address(host) else {
                continue;
            };
            if seen.contains(&id) {
                continue;
            }
            let Some(node) = self.registry.get(&id) else {
                continue;
            };
            if node.origin == NodeOrigin::Discovered && node.is_online() {
                self.registry.mark_offline(&id);
                nodes_marked_offline.push(id);
            }
        }

        if let Some(agent_ids) = self.pull_agents(&mut events).await {
            let live: HashSet<String> = agent_ids.into_iter().collect();
            for node in self.registry.list(&NodeQuery::default()) {
                if node.origin == NodeOrigin::Agent && !live.contains(&node.id) && node.is_online() {
                    self.registry.mark_offline(&node.id);
                    nodes_marked_offline.push(node.id);
                }
            }
            for id in live {
                if seen.insert(id.clone()) {
                    nodes_found.push(id);
                }
            }
        }

        self.remember(&results);
        nodes_marked_offline.sort();
        nodes_marked_offline.dedup();

        let report = ScanReport {
            quick,
            hosts_probed: candidates.len(),
            results,
            events,
            nodes_found,
            nodes_marked_offline,
            duration: started.elapsed(),
        };
        info!(
            quick,
            found = report.nodes_found.len(),
            offline = report.nodes_marked_offline.len(),
            "Recheck complete"
        );
        report
    }

    async fn probe_all(&self, hosts: &[String]) -> (Vec<ProbeResult>, Vec<ProbeEvent>) {
        let mut results = Vec::new();
        let mut events = Vec::new();

        for (i, batch) in hosts.chunks(self.settings.batch_size.max(1)).enumerate() {
            if i > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }

            let reports = join_all(
                batch
                    .iter()
                    .map(|host| self.prober.probe(host, self.settings.ports)),
            )
            .await;

            for report in reports {
                events.extend(report.events);
                results.extend(report.result);
            }
        }

        (results, events)
    }

    /// Upserts live agents; `None` when there is no source or the pull failed
    async fn pull_agents(&self, events: &mut Vec<ProbeEvent>) -> Option<Vec<String>> {
        let source = self.agents.as_ref()?;

        match source.fetch_agents().await {
            Ok(records) => {
                events.push(ProbeEvent::new(
                    "coordinator",
                    ProbePhase::Agents,
                    ProbeOutcome::Reachable,
                ));
                Some(
                    records
                        .iter()
                        .map(|record| self.registry.upsert(record.to_node()).node_id().to_string())
                        .collect(),
                )
            }
            Err(e) => {
                warn!(error = %e, "Failed to pull agent records");
                events.push(ProbeEvent::new(
                    "coordinator",
                    ProbePhase::Agents,
                    ProbeOutcome::Unreachable {
                        reason: e.to_string(),
                    },
                ));
                None
            }
        }
    }

    fn remember(&self, results: &[ProbeResult]) {
        if !self
            .known_hosts
            .extend(results.iter().map(|r| r.host.clone()))
        {
            return;
        }
        if let Err(e) = self.known_hosts.save() {
            warn!(error = %e, "Failed to persist known hosts");
        }
    }
}

/// Loopback results ahead of the rest, so LAN twins fold into them
fn loopback_first(results: &[ProbeResult]) -> Vec<&ProbeResult> {
    let mut ordered: Vec<&ProbeResult> = results.iter().collect();
    ordered.sort_by_key(|r| HostKind::of(&r.host) != HostKind::Loopback);
    ordered
}

fn dedup(hosts: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hosts
        .into_iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty() && seen.insert(h.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{Json, Router, routing::get};
    use reel_core::domain::node::{CapabilityState, Node};
    use reel_core::dto::agent::{AgentCapability, AgentRecord};
    use serde_json::json;

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn text_daemon(models: &'static [&'static str]) -> u16 {
        let app = Router::new().route(
            "/api/tags",
            get(move || async move {
                let models: Vec<_> = models.iter().map(|m| json!({ "name": m })).collect();
                Json(json!({ "models": models }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn scanner(ports: ProbePorts) -> Scanner {
        let settings = ScanSettings {
            ports,
            batch_size: 2,
            batch_pause: Duration::from_millis(1),
            ..Default::default()
        };
        Scanner::new(
            Prober::new(Duration::from_millis(300)).unwrap(),
            Arc::new(NodeRegistry::new()),
            Arc::new(KnownHosts::in_memory()),
            settings,
        )
    }

    struct FixedAgents(Vec<AgentRecord>);

    #[async_trait]
    impl AgentSource for FixedAgents {
        async fn fetch_agents(&self) -> Result<Vec<AgentRecord>, ScanError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_quick_scan_of_empty_localhost_registers_nothing() {
        let ports = ProbePorts {
            text_gen: closed_port().await,
            render: closed_port().await,
        };
        let scanner = scanner(ports);

        let report = scanner.quick_scan().await;
        assert!(report.quick);
        assert_eq!(report.hosts_probed, 1);
        assert!(report.results.is_empty());
        assert!(scanner.registry().is_empty());
    }

    #[tokio::test]
    async fn test_full_scan_registers_and_marks_stale() {
        let ports = ProbePorts {
            text_gen: text_daemon(&["llama3"]).await,
            render: closed_port().await,
        };
        let scanner = scanner(ports);
        scanner.registry().upsert(
            Node::new("10.9.9.9", "10.9.9.9", NodeOrigin::Discovered).with_text_gen(
                CapabilityState::online("http://10.9.9.9:11434", vec!["llama3".to_string()]),
            ),
        );

        let report = scanner
            .scan(&["127.0.0.1".to_string()], &[])
            .await
            .unwrap();

        assert_eq!(report.nodes_found, vec!["127.0.0.1".to_string()]);
        assert_eq!(report.nodes_marked_offline, vec!["10.9.9.9".to_string()]);
        assert!(scanner.registry().get("127.0.0.1").unwrap().is_online());
        assert!(!scanner.registry().get("10.9.9.9").unwrap().is_online());
        assert_eq!(report.summary().hosts_probed, 1);
    }

    #[tokio::test]
    async fn test_agents_count_as_seen() {
        let ports = ProbePorts {
            text_gen: closed_port().await,
            render: closed_port().await,
        };
        let record = AgentRecord {
            hostname: "studio".to_string(),
            ips: vec!["192.168.1.40".to_string()],
            text_gen: AgentCapability {
                available: true,
                models: vec!["qwen".to_string()],
                endpoint: None,
            },
            render: AgentCapability::default(),
            current_job: None,
            last_seen: None,
        };
        let scanner = scanner(ports).with_agent_source(Arc::new(FixedAgents(vec![record])));

        let report = scanner.scan(&[], &[]).await.unwrap();
        assert_eq!(report.nodes_found, vec!["agent:studio".to_string()]);
        assert!(report.nodes_marked_offline.is_empty());
        assert!(scanner.registry().get("agent:studio").unwrap().is_online());
    }

    #[tokio::test]
    async fn test_recheck_marks_silent_host_offline() {
        let ports = ProbePorts {
            text_gen: closed_port().await,
            render: closed_port().await,
        };
        let scanner = scanner(ports);
        scanner.registry().upsert(
            Node::new("127.0.0.1", "127.0.0.1", NodeOrigin::Discovered).with_text_gen(
                CapabilityState::online("http://127.0.0.1:11434", vec!["llama3".to_string()]),
            ),
        );

        let report = scanner.recheck(vec!["127.0.0.1".to_string()], false).await;
        assert_eq!(report.nodes_marked_offline, vec!["127.0.0.1".to_string()]);

        let node = scanner.registry().get("127.0.0.1").unwrap();
        assert!(!node.is_online());
        assert!(node.text_gen.has_model("llama3"));
    }

    #[tokio::test]
    async fn test_invalid_range_fails_scan() {
        let scanner = scanner(ProbePorts::default());
        let result = scanner.scan(&[], &["8.8.8.0/24".to_string()]).await;
        assert!(matches!(result, Err(ScanError::InvalidRange { .. })));
    }

    #[test]
    fn test_loopback_results_are_upserted_first() {
        let result = |host: &str| ProbeResult {
            host: host.to_string(),
            text_gen: None,
            render: None,
            probed_at: chrono::Utc::now(),
        };
        let results = vec![result("192.168.1.20"), result("127.0.0.1"), result("10.0.0.4")];

        let order: Vec<&str> = loopback_first(&results)
            .into_iter()
            .map(|r| r.host.as_str())
            .collect();
        assert_eq!(order, vec!["127.0.0.1", "192.168.1.20", "10.0.0.4"]);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        assert_eq!(
            dedup(vec![
                "b".to_string(),
                " a ".to_string(),
                "b".to_string(),
                String::new()
            ]),
            vec!["b".to_string(), "a".to_string()]
        );
    }
}
