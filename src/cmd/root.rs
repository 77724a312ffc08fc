//! Main daemon command - starts the daemon server

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use stellarfaas_daemon::config::Configuration;
use stellarfaas_daemon::dispatcher::Dispatcher;
use stellarfaas_daemon::driver::DockerDriver;
use stellarfaas_daemon::manager::ManagerRegistry;
use stellarfaas_daemon::router::{self, AppState};
use stellarfaas_daemon::workflow::Orchestrator;

/// Run the main daemon
pub async fn run(config_path: &str) -> Result<()> {
    info!("loading configuration from: {}", config_path);
    let config = Arc::new(Configuration::load(config_path)?);

    info!("api: {}:{}", config.api.host, config.api.port);
    info!("perf log dir: {}", config.perf.log_dir.display());

    let driver = Arc::new(DockerDriver::connect(&config.docker.socket, config.docker.timeout_secs)?);
    let registry = Arc::new(ManagerRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        driver.clone(),
        config.perf.clone(),
        config.managers.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(dispatcher.clone()));

    let state = AppState {
        registry: registry.clone(),
        dispatcher: dispatcher.clone(),
        orchestrator,
        driver: driver.clone(),
        config: config.clone(),
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("listening on {}", bind_addr);

    let shutdown_registry = registry.clone();
    let shutdown = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl+c handler");
        warn!("received shutdown signal, stopping all managers...");

        for manager in shutdown_registry.all() {
            manager.stop_all().await;
        }
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!("server error: {}", e);
        return Err(e.into());
    }

    info!("daemon stopped");
    Ok(())
}
