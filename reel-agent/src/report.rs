//! Local status report
//!
//! Probes the daemons on this machine with the coordinator's own prober and
//! turns the result into the record pushed with each heartbeat.

use reel_core::dto::agent::{AgentCapability, AgentRecord};
use reel_orchestrator::backend::comfy::QueueLoadProbe;
use reel_orchestrator::discovery::probe::base_url;
use reel_orchestrator::discovery::{ProbePorts, ProbeResult, Prober};

use crate::config::Config;

/// Host the local daemons are probed on
const LOCAL_HOST: &str = "127.0.0.1";

pub struct Reporter {
    config: Config,
    prober: Prober,
    queue: QueueLoadProbe,
}

impl Reporter {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let prober = Prober::new(config.probe_timeout)?;
        let queue = QueueLoadProbe::new(config.probe_timeout, config.probe_timeout)?;
        Ok(Self {
            config,
            prober,
            queue,
        })
    }

    /// Probes the local daemons and builds a fresh record
    pub async fn snapshot(&self) -> AgentRecord {
        let ports = ProbePorts {
            text_gen: self.config.text_gen_port,
            render: self.config.render_port,
        };
        let report = self.prober.probe(LOCAL_HOST, ports).await;

        let current_job = match report.result.as_ref().and_then(|r| r.render.as_ref()) {
            Some(render) => self.queue.running_job(&render.endpoint).await,
            None => None,
        };

        self.record_from(report.result.as_ref(), current_job)
    }

    fn record_from(&self, result: Option<&ProbeResult>, current_job: Option<String>) -> AgentRecord {
        let advertised = self
            .config
            .ips
            .first()
            .map(String::as_str)
            .unwrap_or(self.config.hostname.as_str());

        let text_gen = match result.and_then(|r| r.text_gen.as_ref()) {
            Some(text) => AgentCapability {
                available: true,
                models: text.models.clone(),
                endpoint: Some(base_url(advertised, self.config.text_gen_port)),
            },
            None => AgentCapability::default(),
        };

        let render = match result.and_then(|r| r.render.as_ref()) {
            Some(render) => AgentCapability {
                available: true,
                models: render.catalog.checkpoints.clone(),
                endpoint: Some(base_url(advertised, self.config.render_port)),
            },
            None => AgentCapability::default(),
        };

        AgentRecord {
            hostname: self.config.hostname.clone(),
            ips: self.config.ips.clone(),
            text_gen,
            render,
            current_job,
            last_seen: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};
    use serde_json::json;
    use std::time::Duration;

    async fn serve(app: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn config(text_gen_port: u16, render_port: u16) -> Config {
        let mut config = Config::new("studio".to_string(), "http://localhost:8080".to_string());
        config.ips = vec!["192.168.1.5".to_string()];
        config.probe_timeout = Duration::from_millis(500);
        config.text_gen_port = text_gen_port;
        config.render_port = render_port;
        config
    }

    #[tokio::test]
    async fn test_snapshot_reports_local_daemons() {
        let text_gen_port = serve(
            Router::new()
                .route(
                    "/api/tags",
                    get(|| async { Json(json!({ "models": [{ "name": "llama3" }] })) }),
                )
                .route("/api/version", get(|| async { Json(json!({ "version": "0.5.1" })) })),
        )
        .await;
        let render_port = serve(
            Router::new()
                .route(
                    "/system_stats",
                    get(|| async { Json(json!({ "system": { "comfyui_version": "0.3.10" } })) }),
                )
                .route("/object_info", get(|| async { Json(json!({})) }))
                .route(
                    "/queue",
                    get(|| async {
                        Json(json!({ "queue_running": [[4, "p-9", {}]], "queue_pending": [] }))
                    }),
                ),
        )
        .await;

        let reporter = Reporter::new(config(text_gen_port, render_port)).unwrap();
        let record = reporter.snapshot().await;

        assert_eq!(record.hostname, "studio");
        assert!(record.text_gen.available);
        assert_eq!(record.text_gen.models, vec!["llama3".to_string()]);
        assert_eq!(
            record.text_gen.endpoint,
            Some(format!("http://192.168.1.5:{}", text_gen_port))
        );
        assert!(record.render.available);
        assert_eq!(record.current_job.as_deref(), Some("p-9"));
        assert_eq!(record.node_id(), "agent:studio");
    }

    #[tokio::test]
    async fn test_snapshot_with_nothing_listening() {
        let reporter = Reporter::new(config(closed_port().await, closed_port().await)).unwrap();
        let record = reporter.snapshot().await;

        assert!(!record.text_gen.available);
        assert!(!record.render.available);
        assert!(record.current_job.is_none());
        assert!(record.last_seen.is_none());
    }

    #[test]
    fn test_hostname_is_advertised_without_ips() {
        let mut config = config(11434, 8188);
        config.ips.clear();
        let reporter = Reporter::new(config).unwrap();

        let result = ProbeResult {
            host: LOCAL_HOST.to_string(),
            text_gen: Some(reel_orchestrator::discovery::probe::TextGenService {
                endpoint: "http://127.0.0.1:11434".to_string(),
                models: vec!["mistral".to_string()],
                version: None,
            }),
            render: None,
            probed_at: chrono::Utc::now(),
        };
        let record = reporter.record_from(Some(&result), None);
        assert_eq!(
            record.text_gen.endpoint.as_deref(),
            Some("http://studio:11434")
        );
        assert!(!record.render.available);
    }
}
