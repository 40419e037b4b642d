//! Safe Executor - migration decision and execution service
//!
//! Accepts rightsizing recommendations over HTTP, checks them against the
//! instance's utilization forecast and carries out safe migrations.

use anyhow::{Context, Result};
use executor_lib::{
    health::{components, HealthRegistry},
    observability::{ExecutorMetrics, StructuredLogger},
};
use safe_executor::{api, backend, config::AgentConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXECUTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting safe-executor");

    let config = AgentConfig::load().context("failed to load configuration")?;
    info!(
        compute_backend = config.compute_backend.as_str(),
        project_id = ?config.project_id,
        strategy = %config.migration.strategy,
        "Executor configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.register(components::COMPUTE).await;
    health_registry.register(components::FORECAST).await;

    let metrics = ExecutorMetrics::new();
    let orchestrator = Arc::new(backend::build_orchestrator(&config)?);

    let logger = StructuredLogger::new("safe-executor");
    logger.log_startup(
        EXECUTOR_VERSION,
        config.compute_backend.as_str(),
        &config.migration.strategy.to_string(),
    );

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        orchestrator,
    ));

    health_registry.set_ready(true);

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    logger.log_shutdown("API server failed");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    return Err(e.into());
                }
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
