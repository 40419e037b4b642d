//! Instance lifecycle controller
//!
//! Wraps the mutating control plane calls used by a migration. Every
//! operation issues the call, waits for the long-running operation to
//! finish and then waits for the resource itself to reach its target
//! status; operation completion alone is not trusted.
//!
//! Operations are idempotent to report, not to effect: a caller may retry
//! any of them, but must re-describe the instance first.

use crate::compute::{resource_name, ComputeApi, InstanceDescription, InstanceSpec};
use crate::error::{ExecutorError, ExecutorResult};
use crate::inventory::FleetInventory;
use crate::models::{DeleteOutcome, InstanceRef, InstanceStatus};
use crate::waiter::{InstanceStatusProbe, StatusWaiter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Compute Engine resource names are limited to 63 characters
const MAX_RESOURCE_NAME_LEN: usize = 63;

/// A boot disk snapshot taken from a source instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub name: String,
    pub source_instance: String,
    pub source_zone: String,
}

/// Lifecycle operations the orchestrator drives.
///
/// Methods taking an [`InstanceRef`] resolve its zone on first use and
/// cache it on the reference for the rest of the request.
#[async_trait]
pub trait InstanceLifecycle: Send + Sync {
    /// Resolve (or return the cached) zone of an instance
    async fn resolve(&self, instance: &mut InstanceRef) -> ExecutorResult<String>;

    async fn describe(&self, instance: &mut InstanceRef) -> ExecutorResult<InstanceDescription>;

    /// Stop and wait until TERMINATED
    async fn stop(&self, instance: &mut InstanceRef) -> ExecutorResult<()>;

    /// Change the machine type of a TERMINATED instance
    async fn set_machine_type(&self, instance: &mut InstanceRef, machine_type: &str) -> ExecutorResult<()>;

    /// Start and wait until RUNNING
    async fn start(&self, instance: &mut InstanceRef) -> ExecutorResult<()>;

    /// Snapshot the boot disk, storing the snapshot in `storage_region`
    async fn snapshot(&self, instance: &mut InstanceRef, storage_region: &str) -> ExecutorResult<SnapshotRef>;

    /// Provision a new instance booting from the snapshot and return its name.
    ///
    /// The new instance is not guaranteed to be RUNNING yet.
    async fn create_from_snapshot(
        &self,
        snapshot: &SnapshotRef,
        machine_type: &str,
        zone: &str,
    ) -> ExecutorResult<String>;

    async fn wait_running(&self, instance: &mut InstanceRef) -> ExecutorResult<()>;

    /// Best-effort delete; failures are reported in the outcome
    async fn delete(&self, instance: &mut InstanceRef) -> DeleteOutcome;
}

/// Lifecycle controller backed by the compute control plane
pub struct InstanceLifecycleController {
    compute: Arc<dyn ComputeApi>,
    inventory: Arc<dyn FleetInventory>,
    waiter: StatusWaiter,
}

impl InstanceLifecycleController {
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        inventory: Arc<dyn FleetInventory>,
        waiter: StatusWaiter,
    ) -> Self {
        Self {
            compute,
            inventory,
            waiter,
        }
    }

    async fn wait_status(&self, zone: &str, name: &str, expected: InstanceStatus) -> ExecutorResult<()> {
        let probe = InstanceStatusProbe::new(self.compute.clone(), zone, name);
        let outcome = self.waiter.wait_for(&probe, &expected).await?;
        info!(
            instance_id = %name,
            zone = %zone,
            status = %expected,
            polls = outcome.polls,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Instance reached status"
        );
        Ok(())
    }
}

#[async_trait]
impl InstanceLifecycle for InstanceLifecycleController {
    async fn resolve(&self, instance: &mut InstanceRef) -> ExecutorResult<String> {
        if let Some(zone) = &instance.zone {
            return Ok(zone.clone());
        }
        let zone = self.inventory.resolve_zone(&instance.id).await?;
        instance.zone = Some(zone.clone());
        Ok(zone)
    }

    async fn describe(&self, instance: &mut InstanceRef) -> ExecutorResult<InstanceDescription> {
        let zone = self.resolve(instance).await?;
        let description = self.compute.get_instance(&zone, &instance.id).await?;
        instance.machine_type = Some(resource_name(&description.machine_type).to_string());
        Ok(description)
    }

    async fn stop(&self, instance: &mut InstanceRef) -> ExecutorResult<()> {
        let zone = self.resolve(instance).await?;
        info!(instance_id = %instance.id, zone = %zone, "Stopping instance");
        let operation = self.compute.stop(&zone, &instance.id).await?;
        self.compute.wait_operation(&operation).await?;
        self.wait_status(&zone, &instance.id, InstanceStatus::Terminated)
            .await
    }

    async fn set_machine_type(&self, instance: &mut InstanceRef, machine_type: &str) -> ExecutorResult<()> {
        let current = self.describe(instance).await?;
        if current.status != InstanceStatus::Terminated {
            return Err(ExecutorError::InvalidState {
                instance_id: instance.id.clone(),
                expected: InstanceStatus::Terminated.to_string(),
                actual: current.status.to_string(),
            });
        }

        let zone = current.zone;
        info!(
            instance_id = %instance.id,
            zone = %zone,
            from = %resource_name(&current.machine_type),
            to = %machine_type,
            "Changing machine type"
        );
        let operation = self
            .compute
            .set_machine_type(&zone, &instance.id, machine_type)
            .await?;
        self.compute.wait_operation(&operation).await?;
        instance.machine_type = Some(machine_type.to_string());
        Ok(())
    }

    async fn start(&self, instance: &mut InstanceRef) -> ExecutorResult<()> {
        let zone = self.resolve(instance).await?;
        info!(instance_id = %instance.id, zone = %zone, "Starting instance");
        let operation = self.compute.start(&zone, &instance.id).await?;
        self.compute.wait_operation(&operation).await?;
        self.wait_status(&zone, &instance.id, InstanceStatus::Running)
            .await
    }

    async fn snapshot(&self, instance: &mut InstanceRef, storage_region: &str) -> ExecutorResult<SnapshotRef> {
        let current = self.describe(instance).await?;
        let snapshot_error = |reason: String| ExecutorError::Snapshot {
            instance_id: instance.id.clone(),
            reason,
        };

        let disk = current
            .boot_disk
            .as_deref()
            .map(resource_name)
            .ok_or_else(|| snapshot_error("boot disk not found".to_string()))?
            .to_string();
        let name = derived_name(&instance.id, &format!("snap-{}", name_timestamp()));

        info!(
            instance_id = %instance.id,
            zone = %current.zone,
            disk = %disk,
            snapshot = %name,
            storage_region = %storage_region,
            "Creating boot disk snapshot"
        );
        let operation = self
            .compute
            .create_snapshot(&current.zone, &disk, &name, storage_region)
            .await
            .map_err(|e| snapshot_error(e.to_string()))?;
        self.compute
            .wait_operation(&operation)
            .await
            .map_err(|e| snapshot_error(e.to_string()))?;

        Ok(SnapshotRef {
            name,
            source_instance: instance.id.clone(),
            source_zone: current.zone,
        })
    }

    async fn create_from_snapshot(
        &self,
        snapshot: &SnapshotRef,
        machine_type: &str,
        zone: &str,
    ) -> ExecutorResult<String> {
        let spec = InstanceSpec {
            name: derived_name(&snapshot.source_instance, &name_timestamp()),
            machine_type: machine_type.to_string(),
            source_snapshot: snapshot.name.clone(),
            source_instance: snapshot.source_instance.clone(),
            source_zone: snapshot.source_zone.clone(),
        };
        let create_error = |reason: String| ExecutorError::InstanceCreate {
            instance_id: spec.name.clone(),
            reason,
        };

        info!(
            instance_id = %spec.name,
            zone = %zone,
            machine_type = %machine_type,
            snapshot = %snapshot.name,
            "Creating instance from snapshot"
        );
        let operation = self
            .compute
            .insert_instance(zone, &spec)
            .await
            .map_err(|e| create_error(e.to_string()))?;
        self.compute
            .wait_operation(&operation)
            .await
            .map_err(|e| create_error(e.to_string()))?;

        Ok(spec.name)
    }

    async fn wait_running(&self, instance: &mut InstanceRef) -> ExecutorResult<()> {
        let zone = self.resolve(instance).await?;
        self.wait_status(&zone, &instance.id, InstanceStatus::Running)
            .await
    }

    async fn delete(&self, instance: &mut InstanceRef) -> DeleteOutcome {
        let result = async {
            let zone = self.resolve(instance).await?;
            let operation = self.compute.delete_instance(&zone, &instance.id).await?;
            self.compute.wait_operation(&operation).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(instance_id = %instance.id, "Instance deleted");
                DeleteOutcome::Deleted {
                    instance_id: instance.id.clone(),
                }
            }
            Err(e) => {
                warn!(instance_id = %instance.id, error = %e, "Instance delete failed");
                DeleteOutcome::Failed {
                    instance_id: instance.id.clone(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn name_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// `{base}-{suffix}`, shortening `base` so the name fits the resource name limit
fn derived_name(base: &str, suffix: &str) -> String {
    let room = MAX_RESOURCE_NAME_LEN.saturating_sub(suffix.len() + 1);
    let prefix: String = base.chars().take(room).collect();
    format!("{}-{}", prefix.trim_end_matches('-'), suffix)
}
