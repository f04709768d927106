use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reel_orchestrator::api::{self, AppState};
use reel_orchestrator::backend::HttpBackend;
use reel_orchestrator::backend::comfy::QueueLoadProbe;
use reel_orchestrator::config::{Config, PipelineFile};
use reel_orchestrator::discovery::{AgentSource, CoordinatorAgents, KnownHosts, Prober, ScanSettings, Scanner};
use reel_orchestrator::health::HealthMonitor;
use reel_orchestrator::pipeline::{OrchestratorSettings, PipelineOrchestrator};
use reel_orchestrator::registry::NodeRegistry;
use reel_orchestrator::router::CapabilityRouter;
use reel_orchestrator::service::{AgentBoard, RunService};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Assumed duration of one queued render job
const RENDER_JOB_ESTIMATE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Reel coordinator...");

    let config = Config::from_env().context("Failed to read configuration")?;
    config.validate().context("Invalid configuration")?;

    let registry = Arc::new(NodeRegistry::new());

    // Cloud providers and model assignments
    let pipeline_file = match &config.pipeline_file {
        Some(path) => PipelineFile::load(path)
            .with_context(|| format!("Failed to load pipeline file {}", path.display()))?,
        None => {
            tracing::warn!("No pipeline file configured, every step is unassigned");
            PipelineFile::default()
        }
    };
    for provider in &pipeline_file.provider {
        registry.upsert(provider.to_node());
        tracing::info!("Configured cloud provider: {}", provider.name);
    }
    let credentials = pipeline_file.credentials();

    let known_hosts = match &config.known_hosts_path {
        Some(path) => KnownHosts::load(path)
            .with_context(|| format!("Failed to load known hosts from {}", path.display()))?,
        None => KnownHosts::in_memory(),
    };

    // Agents push to this coordinator unless another one is configured
    let agents = Arc::new(AgentBoard::new(Arc::clone(&registry), config.agent_ttl));
    let agent_source: Arc<dyn AgentSource> = match &config.coordinator_url {
        Some(url) => {
            tracing::info!("Pulling agent records from {}", url);
            Arc::new(CoordinatorAgents::new(url.clone()))
        }
        None => agents.clone(),
    };

    let prober = Prober::new(config.probe_timeout).context("Failed to build probe client")?;
    let scanner = Arc::new(
        Scanner::new(
            prober,
            Arc::clone(&registry),
            Arc::new(known_hosts),
            ScanSettings::from_config(&config),
        )
        .with_agent_source(agent_source),
    );

    match scanner.full_scan().await {
        Ok(report) => tracing::info!(
            "Initial scan found {} node(s) among {} host(s)",
            report.nodes_found.len(),
            report.hosts_probed
        ),
        Err(e) => tracing::warn!("Initial scan failed: {}", e),
    }

    let shutdown = CancellationToken::new();
    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&scanner),
        config.health_interval,
    ));
    let monitor_task = monitor.spawn(shutdown.clone());

    let load_probe = QueueLoadProbe::new(config.probe_timeout, RENDER_JOB_ESTIMATE)
        .context("Failed to build load probe client")?;
    let router = Arc::new(
        CapabilityRouter::new(Arc::clone(&registry), pipeline_file.assignments())
            .with_load_probe(Arc::new(load_probe)),
    );

    let backend = HttpBackend::new(config.step_timeout, credentials)
        .context("Failed to build backend client")?;
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Arc::clone(&router),
        Arc::new(backend),
        OrchestratorSettings::from_config(&config),
    ));
    let runs = Arc::new(
        RunService::new(orchestrator)
            .with_shutdown(shutdown.clone())
            .with_retention(config.run_retention),
    );

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        registry,
        scanner,
        router,
        agents,
        runs,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutting down...");
        signal.cancel();
    });

    let graceful = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
        .context("Server error")?;

    shutdown.cancel();
    monitor_task.await.context("Health monitor task panicked")?;

    Ok(())
}
