//! Core data models for the migration engine

use crate::error::{ExecutorError, ExecutorResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed look-ahead window used for safety evaluation
pub const FORECAST_HORIZON_DAYS: usize = 7;

/// Compute Engine instance lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Provisioning => "PROVISIONING",
            InstanceStatus::Staging => "STAGING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Stopping => "STOPPING",
            InstanceStatus::Suspending => "SUSPENDING",
            InstanceStatus::Suspended => "SUSPENDED",
            InstanceStatus::Repairing => "REPAIRING",
            InstanceStatus::Terminated => "TERMINATED",
            InstanceStatus::Unknown => "UNKNOWN",
        }
    }

    /// Parse a status string as reported by the control plane
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PROVISIONING" => InstanceStatus::Provisioning,
            "STAGING" => InstanceStatus::Staging,
            "RUNNING" => InstanceStatus::Running,
            "STOPPING" => InstanceStatus::Stopping,
            "SUSPENDING" => InstanceStatus::Suspending,
            "SUSPENDED" => InstanceStatus::Suspended,
            "REPAIRING" => InstanceStatus::Repairing,
            "TERMINATED" => InstanceStatus::Terminated,
            _ => InstanceStatus::Unknown,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance taking part in one migration request.
///
/// The zone is resolved lazily and cached for the lifetime of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub id: String,
    pub zone: Option<String>,
    pub machine_type: Option<String>,
}

impl InstanceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            zone: None,
            machine_type: None,
        }
    }

    pub fn in_zone(id: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            zone: Some(zone.into()),
            machine_type: None,
        }
    }
}

/// One forecast day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyUtilization {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Seven daily utilization samples for one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationForecast {
    pub instance_id: String,
    samples: Vec<DailyUtilization>,
}

impl UtilizationForecast {
    /// Build a forecast from parallel cpu and memory series.
    ///
    /// Both series must cover exactly the forecast horizon and hold finite values.
    pub fn from_series(
        instance_id: impl Into<String>,
        cpu: &[f64],
        memory: &[f64],
    ) -> ExecutorResult<Self> {
        check_series("cpu", cpu)?;
        check_series("memory", memory)?;

        let samples = cpu
            .iter()
            .zip(memory)
            .map(|(&cpu_percent, &memory_percent)| DailyUtilization {
                cpu_percent,
                memory_percent,
            })
            .collect();

        Ok(Self {
            instance_id: instance_id.into(),
            samples,
        })
    }

    pub fn samples(&self) -> &[DailyUtilization] {
        &self.samples
    }

    pub fn cpu_series(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.cpu_percent).collect()
    }

    pub fn memory_series(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.memory_percent).collect()
    }
}

fn check_series(name: &str, series: &[f64]) -> ExecutorResult<()> {
    if series.len() != FORECAST_HORIZON_DAYS {
        return Err(ExecutorError::InvalidInput(format!(
            "{} series has {} samples, expected {}",
            name,
            series.len(),
            FORECAST_HORIZON_DAYS
        )));
    }
    if let Some(bad) = series.iter().find(|v| !v.is_finite()) {
        return Err(ExecutorError::InvalidInput(format!(
            "{} series contains non-finite value {}",
            name, bad
        )));
    }
    Ok(())
}

/// Outcome of a safety evaluation, with the averages that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub avg_cpu: f64,
    pub avg_mem: f64,
}

/// How the migration is carried out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStrategy {
    /// stop, change machine type, start; identity preserved
    #[default]
    InPlace,
    /// snapshot boot disk, create a new instance, retire the old one
    Snapshot,
}

impl fmt::Display for MigrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStrategy::InPlace => write!(f, "in_place"),
            MigrationStrategy::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Rightsizing recommendation handed over by the upstream advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub instance_id: String,
    #[serde(default)]
    pub current_type: Option<String>,
    pub target_type: String,
    #[serde(default)]
    pub region: Option<String>,
}

/// A single migration request, consumed once by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub instance_id: String,
    pub current_type: Option<String>,
    pub target_machine_type: String,
    pub region: String,
    /// Overrides the source zone for the snapshot strategy
    pub target_zone: Option<String>,
    pub strategy: MigrationStrategy,
}

impl MigrationPlan {
    /// Build a plan from a recommendation, trusting its target type as-is
    pub fn from_recommendation(
        recommendation: Recommendation,
        default_region: &str,
        strategy: MigrationStrategy,
    ) -> Self {
        Self {
            instance_id: recommendation.instance_id,
            current_type: recommendation.current_type,
            target_machine_type: recommendation.target_type,
            region: recommendation
                .region
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| default_region.to_string()),
            target_zone: None,
            strategy,
        }
    }

    pub fn with_target_zone(mut self, zone: impl Into<String>) -> Self {
        self.target_zone = Some(zone.into());
        self
    }

    pub fn with_strategy(mut self, strategy: MigrationStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Named step of the migration workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStep {
    Forecast,
    Evaluate,
    ResolveZone,
    Describe,
    Stop,
    SetMachineType,
    Start,
    Snapshot,
    CreateFromSnapshot,
    AwaitNewInstance,
    DeleteOriginal,
    Verify,
}

impl LifecycleStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStep::Forecast => "forecast",
            LifecycleStep::Evaluate => "evaluate",
            LifecycleStep::ResolveZone => "resolve_zone",
            LifecycleStep::Describe => "describe",
            LifecycleStep::Stop => "stop",
            LifecycleStep::SetMachineType => "set_machine_type",
            LifecycleStep::Start => "start",
            LifecycleStep::Snapshot => "snapshot",
            LifecycleStep::CreateFromSnapshot => "create_from_snapshot",
            LifecycleStep::AwaitNewInstance => "await_new_instance",
            LifecycleStep::DeleteOriginal => "delete_original",
            LifecycleStep::Verify => "verify",
        }
    }

    /// True for steps that change cloud state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            LifecycleStep::Stop
                | LifecycleStep::SetMachineType
                | LifecycleStep::Start
                | LifecycleStep::Snapshot
                | LifecycleStep::CreateFromSnapshot
                | LifecycleStep::DeleteOriginal
        )
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationPhase {
    Pending,
    Forecasting,
    Evaluating,
    UnsafeTerminal,
    Migrating,
    SuccessTerminal,
    FailedTerminal,
}

impl MigrationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPhase::UnsafeTerminal
                | MigrationPhase::SuccessTerminal
                | MigrationPhase::FailedTerminal
        )
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Pending => "PENDING",
            MigrationPhase::Forecasting => "FORECASTING",
            MigrationPhase::Evaluating => "EVALUATING",
            MigrationPhase::UnsafeTerminal => "UNSAFE_TERMINAL",
            MigrationPhase::Migrating => "MIGRATING",
            MigrationPhase::SuccessTerminal => "SUCCESS_TERMINAL",
            MigrationPhase::FailedTerminal => "FAILED_TERMINAL",
        };
        f.write_str(name)
    }
}

/// Terminal status reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    Success,
    Unsafe,
    Failed,
    /// Original instance deleted, replacement not confirmed running
    CriticalFailure,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Success => "SUCCESS",
            MigrationStatus::Unsafe => "UNSAFE",
            MigrationStatus::Failed => "FAILED",
            MigrationStatus::CriticalFailure => "CRITICAL_FAILURE",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last concrete state observed for an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastKnownState {
    pub instance_id: String,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
}

/// Result of best-effort instance deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted { instance_id: String },
    Failed { instance_id: String, reason: String },
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted { .. })
    }
}

/// Terminal record of one migration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub instance_id: String,
    pub strategy: MigrationStrategy,
    pub target_machine_type: String,
    pub status: MigrationStatus,
    #[serde(flatten)]
    pub verdict: Option<SafetyVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<LifecycleStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_state: Option<LastKnownState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<DeleteOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
    pub finished_at: i64,
}

impl MigrationResult {
    pub fn avg_cpu(&self) -> Option<f64> {
        self.verdict.map(|v| v.avg_cpu)
    }

    pub fn avg_mem(&self) -> Option<f64> {
        self.verdict.map(|v| v.avg_mem)
    }
}
