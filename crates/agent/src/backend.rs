//! Wires collaborators for the configured backend

use crate::config::{AgentConfig, ComputeBackend};
use anyhow::{Context, Result};
use executor_lib::compute::{ComputeApi, GceComputeClient, GceConfig, SimulatedCompute};
use executor_lib::{
    ForecastProvider, HttpForecastProvider, InstanceStatus, SafeMigrationOrchestrator,
    StaticForecastProvider,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub fn build_compute(config: &AgentConfig) -> Result<Arc<dyn ComputeApi>> {
    match config.compute_backend {
        ComputeBackend::Gce => {
            let client = GceComputeClient::new(GceConfig {
                endpoint: config.compute_endpoint.clone(),
                project_id: config.project_id.clone().unwrap_or_default(),
                access_token: config.access_token.clone(),
                ..GceConfig::default()
            })
            .context("failed to create compute client")?;
            Ok(Arc::new(client))
        }
        ComputeBackend::Simulated => {
            let fleet = config
                .simulated_fleet
                .iter()
                .fold(SimulatedCompute::new(), |fleet, instance| {
                    fleet.with_instance(
                        &instance.name,
                        &instance.zone,
                        &instance.machine_type,
                        InstanceStatus::Running,
                    )
                });
            info!(
                instances = config.simulated_fleet.len(),
                "Using simulated compute fleet"
            );
            Ok(Arc::new(fleet))
        }
    }
}

pub fn build_forecasts(config: &AgentConfig) -> Result<Arc<dyn ForecastProvider>> {
    match &config.forecast_endpoint {
        Some(endpoint) => {
            let provider = HttpForecastProvider::new(
                endpoint,
                Duration::from_secs(config.forecast_timeout_secs),
            )
            .context("failed to create forecast client")?;
            Ok(Arc::new(provider))
        }
        None => {
            if config.compute_backend == ComputeBackend::Gce {
                warn!("No forecast_endpoint configured; every migration will fail at the forecast step");
            }
            let provider = StaticForecastProvider::new();
            for instance in &config.simulated_fleet {
                provider.insert(
                    &instance.name,
                    instance.cpu_forecast.clone(),
                    instance.memory_forecast.clone(),
                );
            }
            Ok(Arc::new(provider))
        }
    }
}

pub fn build_orchestrator(config: &AgentConfig) -> Result<SafeMigrationOrchestrator> {
    Ok(SafeMigrationOrchestrator::with_compute(
        config.migration.clone(),
        build_compute(config)?,
        build_forecasts(config)?,
    ))
}
