//! Liquid Monitor - single-host metrics agent
//!
//! Samples the host, running containers and a few host services on a fixed
//! interval, keeps restart-proof traffic totals and raises threshold alerts.

use anyhow::{Context, Result};
use monitor_lib::collector::{CollectionLoopBuilder, ContainerRuntime, DockerRuntime};
use monitor_lib::host::{shared_processes, SysinfoHost, SysinfoProcesses};
use monitor_lib::{HealthRegistry, LocalStore, Monitor, MonitorMetrics, StructuredLogger};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting liquid-monitor");

    let config = config::MonitorConfig::load()?;
    info!(
        host_name = %config.host_name,
        interval_secs = config.collection_interval_secs,
        "Monitor configured"
    );

    let logger = StructuredLogger::new(&config.host_name);
    let store = Arc::new(
        LocalStore::open(&config.data_file)
            .with_context(|| format!("Failed to open {}", config.data_file.display()))?,
    );

    let mut builder = Monitor::builder()
        .host_provider(SysinfoHost::new())
        .processes(shared_processes(SysinfoProcesses::new()))
        .store(store)
        .services(config.services.clone())
        .alert_cooldown(config.alert_cooldown())
        .logger(logger.clone());

    if config.docker_enabled {
        match DockerRuntime::connect() {
            Ok(runtime) => {
                let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);
                builder = builder.runtime(runtime);
            }
            Err(e) => warn!(error = %e, "Docker unavailable, containers will not be reported"),
        }
    }

    let monitor = Arc::new(builder.build()?);

    let interval = config.collection_interval();
    let health_registry = HealthRegistry::new().with_stale_after(interval * 3);
    let metrics = MonitorMetrics::new();

    logger.log_startup(
        MONITOR_VERSION,
        &config.data_file.display().to_string(),
        config.docker_enabled,
    );

    let collection_loop = CollectionLoopBuilder::new()
        .monitor(monitor)
        .health(health_registry.clone())
        .interval(interval)
        .alert_retention(config.alert_retention())
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(collection_loop.run(shutdown_rx));

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal or a failed API server
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    logger.log_shutdown("API server failed");
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    logger.log_shutdown("API server task panicked");
                }
            }
        }
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        error!(error = %e, "Collection loop task failed");
    }

    Ok(())
}
