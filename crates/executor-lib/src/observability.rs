//! Observability infrastructure for the safe executor
//!
//! Provides:
//! - Prometheus metrics (migration outcomes, step latency, status polls, in-flight count)
//! - Structured JSON logging of migration events with tracing

use crate::events::{EventKind, EventSink, MigrationEvent};
use crate::models::{LifecycleStep, MigrationResult, MigrationStatus};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for lifecycle step latency (in seconds)
const STEP_LATENCY_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ExecutorMetricsInner> = OnceLock::new();

struct ExecutorMetricsInner {
    migrations_total: IntCounterVec,
    step_duration_seconds: HistogramVec,
    status_polls_total: IntCounter,
    migrations_in_flight: IntGauge,
    safety_verdicts_total: IntCounterVec,
    forecast_errors_total: IntCounter,
}

impl ExecutorMetricsInner {
    fn new() -> Self {
        Self {
            migrations_total: register_int_counter_vec!(
                "safe_executor_migrations_total",
                "Migrations finished, by terminal status",
                &["status"]
            )
            .expect("Failed to register migrations_total"),

            step_duration_seconds: register_histogram_vec!(
                "safe_executor_step_duration_seconds",
                "Time spent in each lifecycle step",
                &["step"],
                STEP_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register step_duration_seconds"),

            status_polls_total: register_int_counter!(
                "safe_executor_status_polls_total",
                "Status samples taken while waiting for resource transitions"
            )
            .expect("Failed to register status_polls_total"),

            migrations_in_flight: register_int_gauge!(
                "safe_executor_migrations_in_flight",
                "Migrations currently holding an instance lease"
            )
            .expect("Failed to register migrations_in_flight"),

            safety_verdicts_total: register_int_counter_vec!(
                "safe_executor_safety_verdicts_total",
                "Safety evaluations, by outcome",
                &["outcome"]
            )
            .expect("Failed to register safety_verdicts_total"),

            forecast_errors_total: register_int_counter!(
                "safe_executor_forecast_errors_total",
                "Forecast lookups that returned an error"
            )
            .expect("Failed to register forecast_errors_total"),
        }
    }
}

/// Handle to the process-wide executor metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ExecutorMetrics {
    _private: (),
}

impl Default for ExecutorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExecutorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ExecutorMetricsInner {
        GLOBAL_METRICS.get_or_init(ExecutorMetricsInner::new)
    }

    pub fn inc_migration(&self, status: MigrationStatus) {
        self.inner()
            .migrations_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn observe_step(&self, step: LifecycleStep, duration_secs: f64) {
        self.inner()
            .step_duration_seconds
            .with_label_values(&[step.as_str()])
            .observe(duration_secs);
    }

    pub fn inc_status_polls(&self) {
        self.inner().status_polls_total.inc();
    }

    pub fn set_in_flight(&self, count: i64) {
        self.inner().migrations_in_flight.set(count);
    }

    pub fn inc_safety_verdict(&self, safe: bool) {
        let outcome = if safe { "safe" } else { "unsafe" };
        self.inner()
            .safety_verdicts_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_forecast_errors(&self) {
        self.inner().forecast_errors_total.inc();
    }
}

/// Structured logger for service and migration events
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, compute_backend: &str, strategy: &str) {
        info!(
            event = "executor_started",
            service = %self.service_name,
            version = %version,
            compute_backend = %compute_backend,
            default_strategy = %strategy,
            "Safe executor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "executor_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Safe executor shutting down"
        );
    }

    /// Log the terminal record of a migration
    pub fn log_result(&self, result: &MigrationResult) {
        let step = result.failed_step.map(|s| s.as_str()).unwrap_or("");
        match result.status {
            MigrationStatus::Success | MigrationStatus::Unsafe => {
                info!(
                    event = "migration_finished",
                    service = %self.service_name,
                    instance_id = %result.instance_id,
                    status = %result.status,
                    strategy = %result.strategy,
                    target_machine_type = %result.target_machine_type,
                    avg_cpu = ?result.avg_cpu(),
                    avg_mem = ?result.avg_mem(),
                    new_instance_id = ?result.new_instance_id,
                    "{}",
                    result.message
                );
            }
            MigrationStatus::Failed => {
                warn!(
                    event = "migration_finished",
                    service = %self.service_name,
                    instance_id = %result.instance_id,
                    status = %result.status,
                    failed_step = %step,
                    error = ?result.error,
                    last_known_state = ?result.last_known_state,
                    "{}",
                    result.message
                );
            }
            MigrationStatus::CriticalFailure => {
                error!(
                    event = "migration_finished",
                    service = %self.service_name,
                    instance_id = %result.instance_id,
                    status = %result.status,
                    failed_step = %step,
                    new_instance_id = ?result.new_instance_id,
                    error = ?result.error,
                    "{}",
                    result.message
                );
            }
        }
    }
}

/// Writes migration events as structured tracing records
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &MigrationEvent) {
        let detail = event.detail.as_deref().unwrap_or("");
        match &event.kind {
            EventKind::PhaseChanged { from, to } => {
                info!(
                    event = "migration_transition",
                    instance_id = %event.instance_id,
                    from = %from,
                    to = %to,
                    detail = %detail,
                    "Migration phase changed"
                );
            }
            EventKind::StepStarted { step } => {
                info!(
                    event = "lifecycle_step",
                    instance_id = %event.instance_id,
                    step = %step,
                    state = "started",
                    detail = %detail,
                    "Lifecycle step started"
                );
            }
            EventKind::StepCompleted { step, duration_ms } => {
                info!(
                    event = "lifecycle_step",
                    instance_id = %event.instance_id,
                    step = %step,
                    state = "completed",
                    duration_ms = *duration_ms,
                    detail = %detail,
                    "Lifecycle step completed"
                );
            }
            EventKind::StepFailed { step, error } => {
                warn!(
                    event = "lifecycle_step",
                    instance_id = %event.instance_id,
                    step = %step,
                    state = "failed",
                    error = %error,
                    detail = %detail,
                    "Lifecycle step failed"
                );
            }
        }
    }
}
