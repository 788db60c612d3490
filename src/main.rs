use std::sync::Arc;

use tracing::{error, info};

use hamlet_server::config::ServerConfig;
use hamlet_server::logging;
use hamlet_server::metrics::{self, Metrics};
use hamlet_server::net::tls::TlsConfig;
use hamlet_server::net::transport::WebTransportServer;
use hamlet_server::net::world_session::{start_tick_loop, WorldSession};
use hamlet_server::sim::SimulationOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = ServerConfig::load_or_default();
    let log_buffer = logging::init_logging(config.log_buffer_lines);

    info!("Hamlet Server v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        anyhow::bail!("invalid configuration: {}", e);
    }
    info!(
        "Configuration loaded: {}:{}, agents={}, tick={}ms, seed={}",
        config.bind_address, config.port, config.agent_count, config.tick_interval_ms, config.sim_seed
    );

    let metrics = Arc::new(Metrics::new());
    {
        let metrics = metrics.clone();
        let logs = log_buffer.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics, logs, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let orchestrator = build_orchestrator(&config);
    let session = WorldSession::new(orchestrator, metrics.clone()).shared();
    let driver = start_tick_loop(session.clone(), config.scheduler_config())?;

    let tls = TlsConfig::load(config.tls_cert_path.as_deref(), config.tls_key_path.as_deref()).await?;
    let server = WebTransportServer::new(config.clone(), tls, session.clone());

    info!("Server ready on https://{}", server.bind_addr());
    info!(
        "Chrome flag: --ignore-certificate-errors-spki-list={}",
        server.cert_hash()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    driver.shutdown().await;
    info!(
        tick_id = session.lock().orchestrator.last_tick_id(),
        "Server stopped"
    );

    Ok(())
}

#[cfg(feature = "llm")]
fn build_orchestrator(config: &ServerConfig) -> SimulationOrchestrator {
    use std::time::Duration;

    use hamlet_server::sim::llm::{LlmDecisionClient, DEFAULT_ENDPOINT};

    let sim_config = config.orchestrator_config();
    match (&config.llm_api_key, config.llm_enabled) {
        (Some(key), true) => {
            let endpoint = config
                .llm_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
            info!("Decision service: {} via {}", config.llm_model, endpoint);
            let client = LlmDecisionClient::with_endpoint(
                key.clone(),
                config.llm_model.clone(),
                endpoint,
                Duration::from_millis(config.llm_timeout_ms),
            );
            SimulationOrchestrator::with_provider(sim_config, Arc::new(client))
        }
        (None, true) => {
            info!("LLM_API_KEY not set, using the local decision heuristic");
            SimulationOrchestrator::new(sim_config)
        }
        _ => SimulationOrchestrator::new(sim_config),
    }
}

#[cfg(not(feature = "llm"))]
fn build_orchestrator(config: &ServerConfig) -> SimulationOrchestrator {
    if config.llm_enabled {
        info!("Built without the `llm` feature, using the local decision heuristic");
    }
    SimulationOrchestrator::new(config.orchestrator_config())
}
