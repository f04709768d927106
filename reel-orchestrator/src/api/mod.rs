//! API Module
//!
//! HTTP API layer for the coordinator.
//! Each submodule handles endpoints for a specific domain.

pub mod agent;
pub mod error;
pub mod health;
pub mod node;
pub mod run;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::discovery::Scanner;
use crate::registry::NodeRegistry;
use crate::router::CapabilityRouter;
use crate::service::{AgentBoard, RunService};

/// Shared services behind every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<NodeRegistry>,
    pub scanner: Arc<Scanner>,
    pub router: Arc<CapabilityRouter>,
    pub agents: Arc<AgentBoard>,
    pub runs: Arc<RunService>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Node registry endpoints
        .route("/api/nodes", get(node::list_nodes))
        .route("/api/nodes/scan", post(node::scan))
        .route("/api/nodes/{id}", get(node::get_node))
        .route(
            "/api/assignments",
            get(node::list_assignments).put(node::set_assignment),
        )
        // Agent endpoints
        .route("/api/agents", get(agent::list_agents))
        .route("/api/agents/heartbeat", post(agent::heartbeat))
        // Run endpoints
        .route("/api/runs", get(run::list_runs).post(run::start_run))
        .route("/api/runs/{id}", get(run::get_run))
        .route("/api/runs/{id}/artifacts", get(run::get_artifacts))
        .route("/api/runs/{id}/cancel", post(run::cancel_run))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{KnownHosts, Prober, ScanSettings};
    use crate::testing::{ScriptedBackend, happy_answer, orchestrator, registry};
    use reel_client::CoordinatorClient;
    use reel_core::domain::assignment::{ModelAssignment, ModelCandidate};
    use reel_core::domain::node::{Capability, CapabilityStatus};
    use reel_core::domain::pipeline::{RunOptions, RunStatus};
    use reel_core::dto::agent::{AgentCapability, AgentRecord};
    use reel_core::dto::node::NodeQuery;
    use reel_core::dto::run::StartRun;
    use std::time::Duration;

    async fn serve() -> (CoordinatorClient, AppState) {
        let registry = registry();
        let orchestrator = Arc::new(orchestrator(
            Arc::clone(&registry),
            ScriptedBackend {
                answer: Box::new(happy_answer),
                delay: None,
            },
            Duration::from_secs(5),
        ));

        let agents = Arc::new(AgentBoard::new(Arc::clone(&registry), Duration::from_secs(90)));
        let scanner = Arc::new(
            Scanner::new(
                Prober::new(Duration::from_millis(200)).unwrap(),
                Arc::clone(&registry),
                Arc::new(KnownHosts::in_memory()),
                ScanSettings {
                    ip_ranges: vec!["8.8.8.0/30".to_string()],
                    ..ScanSettings::default()
                },
            )
            .with_agent_source(agents.clone()),
        );

        let state = AppState {
            registry,
            scanner,
            router: Arc::clone(orchestrator.router()),
            agents,
            runs: Arc::new(RunService::new(orchestrator)),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (CoordinatorClient::new(format!("http://{}", addr)), state)
    }

    #[tokio::test]
    async fn test_health_counts_online_nodes() {
        let (client, _state) = serve().await;

        let body: serde_json::Value = reqwest::get(format!("{}/health", client.base_url()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["nodes_online"], 1);
    }

    #[tokio::test]
    async fn test_node_endpoints() {
        let (client, _state) = serve().await;

        let nodes = client
            .list_nodes(NodeQuery {
                capability: Some(Capability::Render),
                status: Some(CapabilityStatus::Online),
            })
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(client.get_node("n1").await.unwrap().id, "n1");

        let err = client.get_node("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_full_scan_with_public_range_is_bad_request() {
        let (client, _state) = serve().await;

        let err = client.scan(false).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_heartbeat_then_pull() {
        let (client, state) = serve().await;

        let record = AgentRecord {
            hostname: "studio".to_string(),
            ips: vec!["192.168.1.30".to_string()],
            text_gen: AgentCapability {
                available: true,
                models: vec!["mistral".to_string()],
                endpoint: None,
            },
            render: AgentCapability::default(),
            current_job: None,
            last_seen: None,
        };
        client.send_heartbeat(&record).await.unwrap();

        let agents = client.list_agents().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert!(agents[0].last_seen.is_some());
        assert!(state.registry.get("agent:studio").is_some());

        let bad = AgentRecord {
            hostname: String::new(),
            ..record
        };
        assert!(client.send_heartbeat(&bad).await.unwrap_err().is_client_error());
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let (client, _state) = serve().await;

        let run = client
            .start_run(&StartRun {
                premise: "a lighthouse keeper".to_string(),
                options: RunOptions::default(),
            })
            .await
            .unwrap();

        let mut finished = None;
        for _ in 0..200 {
            let current = client.get_run(run.id).await.unwrap();
            if current.status.is_terminal() {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(finished.unwrap().status, RunStatus::Completed);

        let summaries = client.list_runs().await.unwrap();
        assert_eq!(summaries[0].id, run.id);

        // Artifacts are stored right after the final status lands
        let mut artifacts = None;
        for _ in 0..100 {
            if let Ok(value) = client.get_artifacts(run.id).await {
                artifacts = Some(value);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(artifacts.unwrap()["shots"].as_array().unwrap().len(), 1);

        let err = client.cancel_run(run.id).await.unwrap_err();
        assert!(matches!(err, reel_client::ClientError::ApiError { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_assignment_endpoints() {
        let (client, state) = serve().await;

        let assignment = ModelAssignment::new("story", vec![ModelCandidate::new("n2", "mistral", 0)]);
        client.set_assignment(&assignment).await.unwrap();

        let table = client.list_assignments().await.unwrap();
        assert_eq!(table.get("story"), Some(&assignment));
        assert_eq!(state.router.assignments().get("story"), Some(&assignment));
    }
}
