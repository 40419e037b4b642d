//! Component health for liveness and readiness probes
//!
//! Migration outcomes feed back into health: a critical failure means a
//! human has to look at the fleet, so the `compute` component stays
//! degraded until the process restarts.

use crate::models::{LifecycleStep, MigrationResult, MigrationStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving requests
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn observed(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::observed(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::observed(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::observed(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components; an empty registry is healthy
    pub fn worst(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `GET /readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    /// The migration state machine and its leases
    pub const ORCHESTRATOR: &str = "orchestrator";
    /// Cloud control plane, and the fleet it manages
    pub const COMPUTE: &str = "compute";
    pub const FORECAST: &str = "forecast";
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentHealth::healthy()).await;
    }

    async fn set(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentHealth::unhealthy(message)).await;
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Fold a finished migration into component health
    pub async fn record_result(&self, result: &MigrationResult) {
        if result.status == MigrationStatus::CriticalFailure {
            let message = format!(
                "critical failure migrating {}: {}",
                result.instance_id, result.message
            );
            self.set_degraded(components::COMPUTE, message).await;
        }

        if result.failed_step == Some(LifecycleStep::Forecast) {
            let reason = result.error.as_deref().unwrap_or(&result.message);
            self.set_degraded(components::FORECAST, reason).await;
        } else if result.verdict.is_some() {
            self.set_healthy(components::FORECAST).await;
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        HealthResponse {
            status: HealthResponse::worst(&components),
            components,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !self.ready.load(Ordering::SeqCst) {
            Some("Executor not yet initialized")
        } else if !self.health().await.status.is_operational() {
            Some("Critical component unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MigrationStrategy, SafetyVerdict};

    fn result(status: MigrationStatus, failed_step: Option<LifecycleStep>) -> MigrationResult {
        MigrationResult {
            instance_id: "web-1".to_string(),
            strategy: MigrationStrategy::Snapshot,
            target_machine_type: "e2-small".to_string(),
            status,
            verdict: (failed_step != Some(LifecycleStep::Forecast)).then_some(SafetyVerdict {
                safe: true,
                avg_cpu: 10.0,
                avg_mem: 20.0,
            }),
            new_instance_id: None,
            failed_step,
            last_known_state: None,
            cleanup: None,
            error: failed_step.map(|s| format!("{} broke", s)),
            message: "done".to_string(),
            finished_at: 0,
        }
    }

    async fn registry() -> HealthRegistry {
        let registry = HealthRegistry::new();
        registry.register(components::ORCHESTRATOR).await;
        registry.register(components::COMPUTE).await;
        registry.register(components::FORECAST).await;
        registry
    }

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_health_registry_unhealthy_status() {
        let registry = registry().await;
        registry
            .set_unhealthy(components::COMPUTE, "credentials rejected")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!health.components[components::COMPUTE].status.is_operational());
    }

    #[tokio::test]
    async fn test_critical_failure_degrades_compute() {
        let registry = registry().await;
        registry
            .record_result(&result(MigrationStatus::CriticalFailure, Some(LifecycleStep::Verify)))
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::COMPUTE].status,
            ComponentStatus::Degraded
        );

        // later successes do not clear it
        registry
            .record_result(&result(MigrationStatus::Success, None))
            .await;
        let health = registry.health().await;
        assert_eq!(
            health.components[components::COMPUTE].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_forecast_health_follows_lookups() {
        let registry = registry().await;
        registry
            .record_result(&result(MigrationStatus::Failed, Some(LifecycleStep::Forecast)))
            .await;
        let health = registry.health().await;
        assert_eq!(
            health.components[components::FORECAST].status,
            ComponentStatus::Degraded
        );

        registry
            .record_result(&result(MigrationStatus::Unsafe, None))
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_readiness_degraded_still_ready() {
        let registry = registry().await;
        registry.set_ready(true);
        registry.set_degraded(components::COMPUTE, "slow").await;

        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::COMPUTE, "down").await;
        assert!(!registry.readiness().await.ready);
    }
}
