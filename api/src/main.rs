use anyhow::{Context, Result};
use std::net::SocketAddr;

use api::{create_router, AppState};
use common::bootstrap::{init_notifier, init_storage, start_scheduler};
use common::config::Settings;
use common::scheduler::EngineConfig;
use common::telemetry::{init_logging, init_metrics, shutdown_tracer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load().context("Failed to load configuration")?;

    // Initialize structured logging
    init_logging(
        &config.observability.log_level,
        config.observability.tracing_endpoint.as_deref(),
    )?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        storage = %config.storage.path,
        "Configuration loaded"
    );

    // Initialize Prometheus metrics exporter
    let metrics_handle = init_metrics()?;

    // Start the scheduler engine with its persisted messages
    let storage = init_storage(&config);
    let notifier = init_notifier(&config)?;
    let scheduler = start_scheduler(EngineConfig::from(&config), storage, notifier).await;

    // Create application state and router
    let state =
        AppState::new(scheduler.handle.clone(), config.clone()).with_metrics(metrics_handle);
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop the engine and flush the final snapshot even if serving failed
    scheduler.shutdown().await;
    tracing::info!("API server stopped");
    shutdown_tracer();

    served.context("HTTP server error")
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
