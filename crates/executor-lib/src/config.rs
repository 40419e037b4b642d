//! Migration engine configuration

use crate::error::{ExecutorError, ExecutorResult};
use crate::models::MigrationStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Average CPU percent below which a downsize is considered safe
pub const DEFAULT_CPU_THRESHOLD: f64 = 30.0;

/// Average memory percent below which a downsize is considered safe
pub const DEFAULT_MEM_THRESHOLD: f64 = 40.0;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Slack added on top of the summed step timeouts when no explicit deadline is set
const DEADLINE_SLACK: Duration = Duration::from_secs(60);

/// Number of status waits on the longest migration path
const WORST_CASE_WAITS: u32 = 4;

/// Configuration object passed to the orchestrator at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Average CPU threshold in percent
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    /// Average memory threshold in percent
    #[serde(default = "default_mem_threshold")]
    pub mem_threshold: f64,

    /// Seconds between status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum seconds a single status wait may take
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Region used when a recommendation carries none
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Strategy used when a request does not choose one
    #[serde(default)]
    pub strategy: MigrationStrategy,

    /// Outer deadline for a whole migration, in seconds
    #[serde(default)]
    pub migration_deadline_secs: Option<u64>,
}

fn default_cpu_threshold() -> f64 {
    DEFAULT_CPU_THRESHOLD
}

fn default_mem_threshold() -> f64 {
    DEFAULT_MEM_THRESHOLD
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_poll_timeout_secs() -> u64 {
    DEFAULT_POLL_TIMEOUT.as_secs()
}

fn default_region() -> String {
    "us-central1".to_string()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: DEFAULT_CPU_THRESHOLD,
            mem_threshold: DEFAULT_MEM_THRESHOLD,
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            default_region: default_region(),
            strategy: MigrationStrategy::default(),
            migration_deadline_secs: None,
        }
    }
}

impl MigrationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Outer deadline for one migration.
    ///
    /// Falls back to the worst-case sum of per-step waits plus slack.
    pub fn migration_deadline(&self) -> Duration {
        match self.migration_deadline_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.poll_timeout() * WORST_CASE_WAITS + DEADLINE_SLACK,
        }
    }

    /// Reject configurations the orchestrator cannot run with
    pub fn validate(&self) -> ExecutorResult<()> {
        for (name, value) in [
            ("cpu_threshold", self.cpu_threshold),
            ("mem_threshold", self.mem_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ExecutorError::InvalidInput(format!(
                    "{} must be within 0..=100, got {}",
                    name, value
                )));
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ExecutorError::InvalidInput(
                "poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.poll_timeout_secs < self.poll_interval_secs {
            return Err(ExecutorError::InvalidInput(format!(
                "poll_timeout_secs ({}) is shorter than poll_interval_secs ({})",
                self.poll_timeout_secs, self.poll_interval_secs
            )));
        }
        if self.default_region.is_empty() {
            return Err(ExecutorError::InvalidInput(
                "default_region must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
