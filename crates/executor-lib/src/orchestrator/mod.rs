//! Safe migration orchestrator
//!
//! Drives one migration request through
//!
//! ```text
//! PENDING -> FORECASTING -> EVALUATING -> UNSAFE_TERMINAL
//!                                     \-> MIGRATING -> SUCCESS_TERMINAL
//!                                                  \-> FAILED_TERMINAL
//! ```
//!
//! An unsafe verdict never touches cloud resources. A failed lifecycle
//! step is not rolled back; the result carries the failing step and the
//! last state observed for the instance instead. On the snapshot path a
//! failure after the original instance was deleted is reported as
//! `CRITICAL_FAILURE`.
//!
//! Every step runs under one outer deadline. At most one migration per
//! instance is in flight at any time.

mod lease;

pub use lease::{MigrationLease, MigrationLeases};

use crate::compute::{resource_name, ComputeApi};
use crate::config::MigrationConfig;
use crate::error::{ExecutorError, ExecutorResult};
use crate::events::{EventKind, EventSink, MigrationEvent};
use crate::forecast::ForecastProvider;
use crate::inventory::ComputeFleetInventory;
use crate::lifecycle::{InstanceLifecycle, InstanceLifecycleController};
use crate::models::{
    DeleteOutcome, InstanceRef, InstanceStatus, LastKnownState, LifecycleStep, MigrationPhase,
    MigrationPlan, MigrationResult, MigrationStatus, MigrationStrategy, Recommendation,
    SafetyVerdict,
};
use crate::observability::{ExecutorMetrics, StructuredLogger, TracingEventSink};
use crate::safety::SafetyEvaluator;
use crate::waiter::StatusWaiter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Bound on the describe call used to capture state after a failure
const LAST_STATE_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// A lifecycle step that did not complete
#[derive(Debug, Clone, Error)]
#[error("{step} failed for {instance_id}: {source}")]
pub struct StepFailure {
    pub step: LifecycleStep,
    pub instance_id: String,
    pub last_status: Option<InstanceStatus>,
    #[source]
    pub source: ExecutorError,
}

impl StepFailure {
    pub fn new(step: LifecycleStep, instance_id: impl Into<String>, source: ExecutorError) -> Self {
        let observed = match &source {
            ExecutorError::OperationTimeout { last_status, .. } => Some(last_status.as_str()),
            ExecutorError::InvalidState { actual, .. } => Some(actual.as_str()),
            _ => None,
        };
        let last_status = observed
            .map(InstanceStatus::parse)
            .filter(|s| *s != InstanceStatus::Unknown);

        Self {
            step,
            instance_id: instance_id.into(),
            last_status,
            source,
        }
    }
}

/// Runs steps under the outer deadline and reports them to the event sink
struct StepRunner<'a> {
    instance_id: &'a str,
    deadline: Instant,
    phase: MigrationPhase,
    events: &'a dyn EventSink,
    metrics: &'a ExecutorMetrics,
}

impl<'a> StepRunner<'a> {
    fn emit(&self, kind: EventKind, detail: Option<String>) {
        let mut event = MigrationEvent::new(self.instance_id, kind);
        event.detail = detail;
        self.events.emit(&event);
    }

    fn enter(&mut self, to: MigrationPhase, detail: Option<String>) {
        let from = self.phase;
        self.phase = to;
        self.emit(EventKind::PhaseChanged { from, to }, detail);
    }

    async fn run<T, F>(&self, step: LifecycleStep, target: &str, operation: F) -> Result<T, StepFailure>
    where
        F: Future<Output = ExecutorResult<T>>,
    {
        let detail = (target != self.instance_id).then(|| format!("target {}", target));
        self.emit(EventKind::StepStarted { step }, detail.clone());

        let started = Instant::now();
        let outcome = match tokio::time::timeout_at(self.deadline, operation).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ExecutorError::DeadlineExceeded {
                step: step.to_string(),
            }),
        };
        let elapsed = started.elapsed();
        self.metrics.observe_step(step, elapsed.as_secs_f64());

        match outcome {
            Ok(value) => {
                self.emit(
                    EventKind::StepCompleted {
                        step,
                        duration_ms: elapsed.as_millis() as u64,
                    },
                    detail,
                );
                Ok(value)
            }
            Err(error) => {
                self.emit(
                    EventKind::StepFailed {
                        step,
                        error: error.to_string(),
                    },
                    detail,
                );
                Err(StepFailure::new(step, target, error))
            }
        }
    }
}

/// How a request ended, before it is turned into a [`MigrationResult`]
struct Outcome {
    status: MigrationStatus,
    new_instance_id: Option<String>,
    failure: Option<StepFailure>,
    last_known_state: Option<LastKnownState>,
    cleanup: Option<DeleteOutcome>,
    message: String,
}

impl Outcome {
    fn failed(failure: StepFailure, last_known_state: Option<LastKnownState>) -> Self {
        Self {
            status: MigrationStatus::Failed,
            message: format!("Migration failed at step {}: {}", failure.step, failure.source),
            new_instance_id: None,
            failure: Some(failure),
            last_known_state,
            cleanup: None,
        }
    }

    fn into_result(self, plan: &MigrationPlan, verdict: Option<SafetyVerdict>) -> MigrationResult {
        MigrationResult {
            instance_id: plan.instance_id.clone(),
            strategy: plan.strategy,
            target_machine_type: plan.target_machine_type.clone(),
            status: self.status,
            verdict,
            new_instance_id: self.new_instance_id,
            failed_step: self.failure.as_ref().map(|f| f.step),
            last_known_state: self.last_known_state,
            cleanup: self.cleanup,
            error: self.failure.map(|f| f.source.to_string()),
            message: self.message,
            finished_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Top-level migration state machine
pub struct SafeMigrationOrchestrator {
    config: MigrationConfig,
    evaluator: SafetyEvaluator,
    forecasts: Arc<dyn ForecastProvider>,
    lifecycle: Arc<dyn InstanceLifecycle>,
    events: Arc<dyn EventSink>,
    leases: MigrationLeases,
    metrics: ExecutorMetrics,
    logger: StructuredLogger,
}

impl SafeMigrationOrchestrator {
    pub fn new(
        config: MigrationConfig,
        forecasts: Arc<dyn ForecastProvider>,
        lifecycle: Arc<dyn InstanceLifecycle>,
    ) -> Self {
        Self {
            evaluator: SafetyEvaluator::from_config(&config),
            config,
            forecasts,
            lifecycle,
            events: Arc::new(TracingEventSink),
            leases: MigrationLeases::new(),
            metrics: ExecutorMetrics::new(),
            logger: StructuredLogger::new("safe-executor"),
        }
    }

    /// Wire the standard lifecycle controller over a compute control plane
    pub fn with_compute(
        config: MigrationConfig,
        compute: Arc<dyn ComputeApi>,
        forecasts: Arc<dyn ForecastProvider>,
    ) -> Self {
        let inventory = Arc::new(ComputeFleetInventory::new(compute.clone()));
        let controller =
            InstanceLifecycleController::new(compute, inventory, StatusWaiter::from_config(&config));
        Self::new(config, forecasts, Arc::new(controller))
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn evaluator(&self) -> SafetyEvaluator {
        self.evaluator
    }

    /// Instance ids with a migration currently in flight
    pub fn active_migrations(&self) -> Vec<String> {
        self.leases.active()
    }

    /// Build a plan from an upstream recommendation using the configured defaults
    pub fn plan(&self, recommendation: Recommendation) -> MigrationPlan {
        MigrationPlan::from_recommendation(
            recommendation,
            &self.config.default_region,
            self.config.strategy,
        )
    }

    /// Run one migration request to a terminal status.
    ///
    /// Returns `Err` only when the request is rejected before it starts:
    /// a malformed plan, or another migration already holding the
    /// instance. Every other outcome, including failures, is a
    /// [`MigrationResult`].
    pub async fn execute(&self, plan: MigrationPlan) -> ExecutorResult<MigrationResult> {
        validate_plan(&plan)?;

        let lease = self.leases.try_acquire(&plan.instance_id)?;
        info!(
            instance_id = %plan.instance_id,
            target_machine_type = %plan.target_machine_type,
            strategy = %plan.strategy,
            region = %plan.region,
            "Migration requested"
        );

        let result = self.drive(&plan).await;

        drop(lease);
        self.metrics.inc_migration(result.status);
        self.logger.log_result(&result);
        Ok(result)
    }

    async fn drive(&self, plan: &MigrationPlan) -> MigrationResult {
        let id = plan.instance_id.as_str();
        let mut runner = StepRunner {
            instance_id: id,
            deadline: Instant::now() + self.config.migration_deadline(),
            phase: MigrationPhase::Pending,
            events: self.events.as_ref(),
            metrics: &self.metrics,
        };

        runner.enter(MigrationPhase::Forecasting, None);
        let forecast = match runner
            .run(LifecycleStep::Forecast, id, async {
                self.forecasts
                    .get_forecast(id)
                    .await
                    .map_err(ExecutorError::from)
            })
            .await
        {
            Ok(forecast) => forecast,
            Err(failure) => {
                self.metrics.inc_forecast_errors();
                let outcome = Outcome::failed(failure, None);
                runner.enter(MigrationPhase::FailedTerminal, Some(outcome.message.clone()));
                return outcome.into_result(plan, None);
            }
        };

        runner.enter(MigrationPhase::Evaluating, None);
        let verdict = match runner
            .run(LifecycleStep::Evaluate, id, async {
                self.evaluator.evaluate_forecast(&forecast)
            })
            .await
        {
            Ok(verdict) => verdict,
            Err(failure) => {
                let outcome = Outcome::failed(failure, None);
                runner.enter(MigrationPhase::FailedTerminal, Some(outcome.message.clone()));
                return outcome.into_result(plan, None);
            }
        };
        self.metrics.inc_safety_verdict(verdict.safe);

        if !verdict.safe {
            let message = format!(
                "Migration unsafe: forecast avg cpu {:.1}% (limit {:.1}%), avg memory {:.1}% (limit {:.1}%)",
                verdict.avg_cpu, self.config.cpu_threshold, verdict.avg_mem, self.config.mem_threshold
            );
            runner.enter(MigrationPhase::UnsafeTerminal, Some(message.clone()));
            let outcome = Outcome {
                status: MigrationStatus::Unsafe,
                new_instance_id: None,
                failure: None,
                last_known_state: None,
                cleanup: None,
                message,
            };
            return outcome.into_result(plan, Some(verdict));
        }

        runner.enter(MigrationPhase::Migrating, Some(plan.strategy.to_string()));
        let outcome = match plan.strategy {
            MigrationStrategy::InPlace => self.migrate_in_place(plan, &runner).await,
            MigrationStrategy::Snapshot => self.migrate_via_snapshot(plan, &runner).await,
        };

        let terminal = if outcome.status == MigrationStatus::Success {
            MigrationPhase::SuccessTerminal
        } else {
            MigrationPhase::FailedTerminal
        };
        runner.enter(terminal, Some(outcome.message.clone()));
        outcome.into_result(plan, Some(verdict))
    }

    /// stop -> set machine type -> start, on the same instance
    async fn migrate_in_place(&self, plan: &MigrationPlan, runner: &StepRunner<'_>) -> Outcome {
        let mut instance = InstanceRef::new(plan.instance_id.as_str());
        instance.machine_type = plan.current_type.clone();

        match self.in_place_steps(plan, runner, &mut instance).await {
            Ok(state) => Outcome {
                status: MigrationStatus::Success,
                message: format!(
                    "Instance {} is running {}",
                    plan.instance_id, plan.target_machine_type
                ),
                new_instance_id: None,
                failure: None,
                last_known_state: Some(state),
                cleanup: None,
            },
            Err(failure) => {
                let state = self.last_known_state(&mut instance, &failure).await;
                Outcome::failed(failure, state)
            }
        }
    }

    async fn in_place_steps(
        &self,
        plan: &MigrationPlan,
        runner: &StepRunner<'_>,
        instance: &mut InstanceRef,
    ) -> Result<LastKnownState, StepFailure> {
        let id = plan.instance_id.as_str();
        let target = plan.target_machine_type.as_str();
        let lifecycle = self.lifecycle.as_ref();

        runner
            .run(LifecycleStep::ResolveZone, id, lifecycle.resolve(instance))
            .await?;
        runner
            .run(LifecycleStep::Describe, id, lifecycle.describe(instance))
            .await?;
        runner
            .run(LifecycleStep::Stop, id, lifecycle.stop(instance))
            .await?;
        runner
            .run(
                LifecycleStep::SetMachineType,
                id,
                lifecycle.set_machine_type(instance, target),
            )
            .await?;
        runner
            .run(LifecycleStep::Start, id, lifecycle.start(instance))
            .await?;
        runner
            .run(LifecycleStep::Verify, id, self.verify(instance, target))
            .await
    }

    /// snapshot -> create replacement -> wait RUNNING -> delete original -> verify
    async fn migrate_via_snapshot(&self, plan: &MigrationPlan, runner: &StepRunner<'_>) -> Outcome {
        let id = plan.instance_id.as_str();
        let target = plan.target_machine_type.as_str();
        let lifecycle = self.lifecycle.as_ref();
        let mut original = InstanceRef::new(id);
        original.machine_type = plan.current_type.clone();

        let source_zone = match runner
            .run(LifecycleStep::ResolveZone, id, lifecycle.resolve(&mut original))
            .await
        {
            Ok(zone) => zone,
            Err(failure) => return Outcome::failed(failure, None),
        };

        let snapshot = match runner
            .run(
                LifecycleStep::Snapshot,
                id,
                lifecycle.snapshot(&mut original, &plan.region),
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(failure) => {
                let state = self.last_known_state(&mut original, &failure).await;
                return Outcome::failed(failure, state);
            }
        };

        let zone = plan.target_zone.clone().unwrap_or(source_zone);
        let new_id = match runner
            .run(
                LifecycleStep::CreateFromSnapshot,
                id,
                lifecycle.create_from_snapshot(&snapshot, target, &zone),
            )
            .await
        {
            Ok(new_id) => new_id,
            Err(failure) => {
                let state = self.last_known_state(&mut original, &failure).await;
                return Outcome::failed(failure, state);
            }
        };

        let mut replacement = InstanceRef::in_zone(new_id.as_str(), zone);
        if let Err(failure) = runner
            .run(
                LifecycleStep::AwaitNewInstance,
                &new_id,
                lifecycle.wait_running(&mut replacement),
            )
            .await
        {
            let state = self.last_known_state(&mut original, &failure).await;
            let mut outcome = Outcome::failed(failure, state);
            outcome.message = format!(
                "{}; original instance {} left untouched, replacement {} may need cleanup",
                outcome.message, id, new_id
            );
            outcome.new_instance_id = Some(new_id);
            return outcome;
        }

        // Once the delete has been issued the original may be gone, even if
        // the deadline fired before the call returned.
        let (cleanup, original_retired) = match runner
            .run(LifecycleStep::DeleteOriginal, id, async {
                Ok(lifecycle.delete(&mut original).await)
            })
            .await
        {
            Ok(cleanup) => {
                let retired = cleanup.is_deleted();
                (cleanup, retired)
            }
            Err(failure) => (
                DeleteOutcome::Failed {
                    instance_id: id.to_string(),
                    reason: failure.source.to_string(),
                },
                true,
            ),
        };
        if let DeleteOutcome::Failed { reason, .. } = &cleanup {
            warn!(instance_id = %id, reason = %reason, "Original instance was not deleted");
        }

        match runner
            .run(LifecycleStep::Verify, &new_id, self.verify(&mut replacement, target))
            .await
        {
            Ok(state) => {
                let mut message = format!(
                    "Instance {} replaced by {} running {}",
                    id, new_id, target
                );
                if let DeleteOutcome::Failed { reason, .. } = &cleanup {
                    message.push_str(&format!("; original could not be deleted: {}", reason));
                }
                Outcome {
                    status: MigrationStatus::Success,
                    new_instance_id: Some(new_id),
                    failure: None,
                    last_known_state: Some(state),
                    cleanup: Some(cleanup),
                    message,
                }
            }
            Err(failure) => {
                let state = self.last_known_state(&mut replacement, &failure).await;
                let (status, message) = if original_retired {
                    (
                        MigrationStatus::CriticalFailure,
                        format!(
                            "Original instance {} was deleted but replacement {} is not confirmed running; manual recovery required",
                            id, new_id
                        ),
                    )
                } else {
                    (
                        MigrationStatus::Failed,
                        format!(
                            "Replacement {} is not confirmed running; original instance {} is still present",
                            new_id, id
                        ),
                    )
                };
                Outcome {
                    status,
                    new_instance_id: Some(new_id),
                    failure: Some(failure),
                    last_known_state: state,
                    cleanup: Some(cleanup),
                    message,
                }
            }
        }
    }

    /// Confirm the instance is RUNNING with the requested machine type
    async fn verify(&self, instance: &mut InstanceRef, machine_type: &str) -> ExecutorResult<LastKnownState> {
        self.lifecycle.wait_running(instance).await?;
        let current = self.lifecycle.describe(instance).await?;
        let actual_type = resource_name(&current.machine_type);

        if current.status != InstanceStatus::Running || actual_type != machine_type {
            return Err(ExecutorError::InvalidState {
                instance_id: instance.id.clone(),
                expected: format!("{} {}", InstanceStatus::Running, machine_type),
                actual: format!("{} {}", current.status, actual_type),
            });
        }

        Ok(LastKnownState {
            instance_id: instance.id.clone(),
            status: current.status,
            machine_type: Some(actual_type.to_string()),
        })
    }

    /// Re-query an instance after a failure; the last requested transition
    /// may or may not have happened.
    async fn last_known_state(
        &self,
        instance: &mut InstanceRef,
        failure: &StepFailure,
    ) -> Option<LastKnownState> {
        if failure.step == LifecycleStep::ResolveZone {
            return None;
        }

        match tokio::time::timeout(LAST_STATE_PROBE_TIMEOUT, self.lifecycle.describe(instance)).await {
            Ok(Ok(current)) => Some(LastKnownState {
                instance_id: instance.id.clone(),
                status: current.status,
                machine_type: Some(resource_name(&current.machine_type).to_string()),
            }),
            _ => failure.last_status.map(|status| LastKnownState {
                instance_id: instance.id.clone(),
                status,
                machine_type: instance.machine_type.clone(),
            }),
        }
    }
}

fn validate_plan(plan: &MigrationPlan) -> ExecutorResult<()> {
    if plan.instance_id.trim().is_empty() {
        return Err(ExecutorError::InvalidInput("instance_id is required".to_string()));
    }
    if plan.target_machine_type.trim().is_empty() {
        return Err(ExecutorError::InvalidInput(
            "target machine type is required".to_string(),
        ));
    }
    if plan.region.trim().is_empty() {
        return Err(ExecutorError::InvalidInput("region is required".to_string()));
    }
    if plan.strategy == MigrationStrategy::InPlace && plan.target_zone.is_some() {
        return Err(ExecutorError::InvalidInput(
            "target_zone is only supported by the snapshot strategy".to_string(),
        ));
    }
    Ok(())
}
