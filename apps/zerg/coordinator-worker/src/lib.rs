//! Coordinator Worker Service
//!
//! Runs the background coordination layer: the default, notifications, and
//! reminders job queues plus the shared cache and session store.
//!
//! ## Architecture
//!
//! ```text
//! Producers (business services)
//!   ↓ schedule_* / add_job
//! Redis (sorted-set job indices, cache entries, sessions)
//!   ↑ tick per queue: promote → claim → execute
//! Coordinator (this process)
//!   ↓ handler results
//! Cache (notifications:*, reminders:*, recommendations:*)
//! ```
//!
//! ## Features
//!
//! - Atomic job claim, so several workers can share a queue
//! - Retry with exponential backoff and stalled-lease recovery
//! - Graceful shutdown that lets in-flight jobs finish
//! - Health, stats, and Prometheus endpoints for Kubernetes probes

pub mod config;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use core_config::{Environment, FromEnv};
use domain_coordination::Coordinator;
use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::health::HealthState;

async fn start_health_server(state: HealthState, port: u16) -> Result<()> {
    let app = health::router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the coordinator worker
///
/// 1. Sets up error reports and structured logging
/// 2. Loads configuration from the environment
/// 3. Connects to Redis and starts every queue
/// 4. Serves health endpoints until SIGINT/SIGTERM, then shuts down
///
/// # Errors
///
/// Returns an error if configuration is invalid, Redis is unreachable, or a
/// queue fails to start.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    metrics::init_metrics();

    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    info!(name, version, environment = ?environment, "Starting coordinator worker");

    let config = WorkerConfig::from_env().wrap_err("Failed to load configuration")?;

    info!("Connecting to Redis...");
    let coordinator = Coordinator::connect(config.coordinator)
        .await
        .wrap_err("Failed to connect to Redis")?;
    let coordinator = Arc::new(coordinator);

    coordinator
        .initialize()
        .await
        .wrap_err("Failed to initialize coordinator")?;

    let state = HealthState::new(coordinator.clone(), name, version);
    let health_port = config.health_port;
    let server = tokio::spawn(async move {
        if let Err(e) = start_health_server(state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    if let Err(e) = shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }

    coordinator.shutdown().await;
    server.abort();

    info!("Coordinator worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = ctrl_c => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
