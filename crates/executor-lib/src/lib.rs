//! Safe migration decision and execution engine
//!
//! This crate provides the core functionality for:
//! - Deciding whether downsizing an instance is safe from its weekly forecast
//! - Resolving instance zones and polling resource status
//! - Driving in-place and snapshot-based machine type migrations
//! - Compute Engine and simulated control plane adapters
//! - Health checks and observability

pub mod compute;
pub mod config;
pub mod error;
pub mod events;
pub mod forecast;
pub mod health;
pub mod inventory;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod safety;
pub mod waiter;

pub use config::MigrationConfig;
pub use error::{ExecutorError, ExecutorResult};
pub use events::{EventKind, EventSink, MigrationEvent, RecordingEventSink};
pub use forecast::{ForecastError, ForecastProvider, HttpForecastProvider, StaticForecastProvider};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use inventory::{ComputeFleetInventory, FleetInventory};
pub use lifecycle::{InstanceLifecycle, InstanceLifecycleController, SnapshotRef};
pub use models::*;
pub use observability::{ExecutorMetrics, StructuredLogger, TracingEventSink};
pub use orchestrator::{MigrationLease, MigrationLeases, SafeMigrationOrchestrator, StepFailure};
pub use safety::SafetyEvaluator;
pub use waiter::{InstanceStatusProbe, StatusProbe, StatusWaiter, WaitOutcome};
