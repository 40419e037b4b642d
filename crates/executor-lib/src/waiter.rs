//! Bounded status polling
//!
//! Waits for a resource to reach an expected status, sampling at a
//! constant interval until a timeout. Cloud lifecycle transitions are
//! themselves bounded, so there is no backoff.
//!
//! Waits are cancellable at the call site: dropping the future (for
//! example via `tokio::time::timeout_at` around it) aborts before the
//! next poll. The underlying cloud operation keeps running, so callers
//! must re-query state rather than assume the transition happened.

use crate::compute::ComputeApi;
use crate::config::{MigrationConfig, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};
use crate::error::{ExecutorError, ExecutorResult};
use crate::models::InstanceStatus;
use crate::observability::ExecutorMetrics;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Something whose status can be sampled
#[async_trait]
pub trait StatusProbe: Send + Sync {
    type Status: PartialEq + fmt::Display + Send + Sync;

    /// Human-readable resource reference used in errors and logs
    fn resource(&self) -> String;

    async fn current_status(&self) -> ExecutorResult<Self::Status>;
}

/// Successful wait statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitOutcome {
    pub polls: u32,
    pub elapsed: Duration,
}

/// Constant-interval status waiter
#[derive(Clone)]
pub struct StatusWaiter {
    interval: Duration,
    timeout: Duration,
    metrics: ExecutorMetrics,
}

impl Default for StatusWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT)
    }
}

impl StatusWaiter {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            metrics: ExecutorMetrics::new(),
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(config.poll_interval(), config.poll_timeout())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait with the configured interval and timeout
    pub async fn wait_for<P: StatusProbe + ?Sized>(
        &self,
        probe: &P,
        expected: &P::Status,
    ) -> ExecutorResult<WaitOutcome> {
        self.wait_for_with(probe, expected, self.timeout, self.interval)
            .await
    }

    /// Poll until `expected` is observed or `timeout` has elapsed.
    ///
    /// The first sample is taken immediately; a sample is also taken at the
    /// timeout boundary before giving up.
    pub async fn wait_for_with<P: StatusProbe + ?Sized>(
        &self,
        probe: &P,
        expected: &P::Status,
        timeout: Duration,
        interval: Duration,
    ) -> ExecutorResult<WaitOutcome> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let status = probe.current_status().await?;
            polls += 1;
            self.metrics.inc_status_polls();

            let elapsed = started.elapsed();
            if status == *expected {
                debug!(
                    resource = %probe.resource(),
                    status = %status,
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Resource reached expected status"
                );
                return Ok(WaitOutcome { polls, elapsed });
            }

            if elapsed >= timeout {
                return Err(ExecutorError::OperationTimeout {
                    resource: probe.resource(),
                    expected: expected.to_string(),
                    last_status: status.to_string(),
                    timeout,
                });
            }

            debug!(
                resource = %probe.resource(),
                current = %status,
                expected = %expected,
                "Waiting for status"
            );
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
        }
    }
}

/// Samples an instance's status through the compute control plane
pub struct InstanceStatusProbe {
    compute: Arc<dyn ComputeApi>,
    zone: String,
    name: String,
}

impl InstanceStatusProbe {
    pub fn new(compute: Arc<dyn ComputeApi>, zone: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            compute,
            zone: zone.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl StatusProbe for InstanceStatusProbe {
    type Status = InstanceStatus;

    fn resource(&self) -> String {
        format!("instance {} ({})", self.name, self.zone)
    }

    async fn current_status(&self) -> ExecutorResult<InstanceStatus> {
        Ok(self.compute.get_instance(&self.zone, &self.name).await?.status)
    }
}
