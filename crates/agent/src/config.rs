//! Service configuration

use anyhow::{bail, Context, Result};
use executor_lib::MigrationConfig;
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming an optional TOML configuration file
pub const CONFIG_FILE_ENV: &str = "EXECUTOR_CONFIG_FILE";

/// Which compute control plane the service talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeBackend {
    /// Compute Engine v1 REST API
    Gce,
    /// In-memory fleet, for dry runs
    #[default]
    Simulated,
}

impl ComputeBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeBackend::Gce => "gce",
            ComputeBackend::Simulated => "simulated",
        }
    }
}

/// An instance seeded into the simulated fleet, with its forecast
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedInstanceConfig {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    #[serde(default)]
    pub cpu_forecast: Vec<f64>,
    #[serde(default)]
    pub memory_forecast: Vec<f64>,
}

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// API server port for migrations, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Cloud project hosting the fleet
    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default)]
    pub compute_backend: ComputeBackend,

    #[serde(default = "default_compute_endpoint")]
    pub compute_endpoint: String,

    /// Bearer token for the compute API
    #[serde(default)]
    pub access_token: Option<String>,

    /// Forecast service base URL; without one, forecasts come from the simulated fleet
    #[serde(default)]
    pub forecast_endpoint: Option<String>,

    #[serde(default = "default_forecast_timeout")]
    pub forecast_timeout_secs: u64,

    #[serde(default)]
    pub migration: MigrationConfig,

    #[serde(default)]
    pub simulated_fleet: Vec<SimulatedInstanceConfig>,
}

fn default_api_port() -> u16 {
    8080
}

fn default_compute_endpoint() -> String {
    "https://compute.googleapis.com/compute/v1/".to_string()
}

fn default_forecast_timeout() -> u64 {
    10
}

impl AgentConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::load_from(Some(Path::new(&path))),
            Err(_) => Self::load_from(None),
        }
    }

    /// Load from `path` (if any) with `EXECUTOR_*` environment overrides on top.
    ///
    /// Nested keys use a double underscore, e.g. `EXECUTOR_MIGRATION__CPU_THRESHOLD`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("EXECUTOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let parsed: AgentConfig = config
            .try_deserialize()
            .context("failed to parse configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        self.migration
            .validate()
            .context("invalid migration configuration")?;

        if self.compute_backend == ComputeBackend::Gce
            && self.project_id.as_deref().map_or(true, str::is_empty)
        {
            bail!("project_id is required for the gce compute backend");
        }
        if self.forecast_timeout_secs == 0 {
            bail!("forecast_timeout_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor_lib::MigrationStrategy;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AgentConfig::load_from(None).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.compute_backend, ComputeBackend::Simulated);
        assert_eq!(config.migration.cpu_threshold, 30.0);
        assert_eq!(config.migration.mem_threshold, 40.0);
        assert_eq!(config.migration.strategy, MigrationStrategy::InPlace);
    }

    #[test]
    fn test_loads_toml_file() {
        let file = write_config(
            r#"
api_port = 9191
project_id = "greenops-prod"
compute_backend = "gce"
forecast_endpoint = "http://forecaster:8000"

[migration]
cpu_threshold = 25.0
poll_interval_secs = 10
default_region = "europe-west1"
strategy = "snapshot"
"#,
        );

        let config = AgentConfig::load_from(Some(file.path())).unwrap();

        assert_eq!(config.api_port, 9191);
        assert_eq!(config.compute_backend, ComputeBackend::Gce);
        assert_eq!(config.project_id.as_deref(), Some("greenops-prod"));
        assert_eq!(config.migration.cpu_threshold, 25.0);
        assert_eq!(config.migration.mem_threshold, 40.0);
        assert_eq!(config.migration.poll_interval_secs, 10);
        assert_eq!(config.migration.default_region, "europe-west1");
        assert_eq!(config.migration.strategy, MigrationStrategy::Snapshot);
    }

    #[test]
    fn test_simulated_fleet_section() {
        let file = write_config(
            r#"
[[simulated_fleet]]
name = "web-1"
zone = "us-central1-a"
machine_type = "e2-standard-4"
cpu_forecast = [10.0, 11.0, 12.0, 10.0, 9.0, 8.0, 10.0]
memory_forecast = [20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0]
"#,
        );

        let config = AgentConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.simulated_fleet.len(), 1);
        assert_eq!(config.simulated_fleet[0].cpu_forecast.len(), 7);
    }

    #[test]
    fn test_gce_requires_project() {
        let file = write_config("compute_backend = \"gce\"\n");
        let err = AgentConfig::load_from(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("project_id"));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let file = write_config("[migration]\ncpu_threshold = 130.0\n");
        assert!(AgentConfig::load_from(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/executor.toml");
        assert!(AgentConfig::load_from(Some(missing)).is_err());
    }
}
