//! Cloud compute control plane
//!
//! This module defines the lifecycle primitives the migration engine
//! needs from the cloud (describe, stop, start, set machine type,
//! insert, delete, snapshot) and two implementations:
//! - Compute Engine v1 REST client
//! - In-memory simulated fleet for dry runs and tests
//!
//! Every mutating call returns a long-running operation handle. Operation
//! completion is awaited with [`ComputeApi::wait_operation`]; it does not
//! imply the resource has reached its target status.

mod gce;
mod simulated;

pub use gce::{GceComputeClient, GceConfig};
pub use simulated::{SimulatedCompute, SimulatedInstance};

use crate::error::ExecutorResult;
use crate::models::InstanceStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Instance names found in one zone of an inventory page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneInstances {
    pub zone: String,
    pub instances: Vec<String>,
}

/// One page of the aggregated, zone-grouped fleet inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryPage {
    pub zones: Vec<ZoneInstances>,
    pub next_page_token: Option<String>,
}

/// Current state of an instance as reported by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub name: String,
    pub zone: String,
    pub status: InstanceStatus,
    pub machine_type: String,
    pub boot_disk: Option<String>,
}

/// Handle for a long-running control plane operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub name: String,
    pub zone: Option<String>,
    pub target: String,
}

/// Parameters for provisioning an instance from a snapshot.
///
/// Network interfaces, service accounts, labels, tags and metadata are
/// carried over from the source instance by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub machine_type: String,
    pub source_snapshot: String,
    pub source_instance: String,
    pub source_zone: String,
}

/// Lifecycle primitives of the compute control plane
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Fetch one page of the aggregated instance inventory
    async fn aggregated_list(&self, page_token: Option<&str>) -> ExecutorResult<InventoryPage>;

    /// Describe one instance
    async fn get_instance(&self, zone: &str, name: &str) -> ExecutorResult<InstanceDescription>;

    async fn stop(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle>;

    async fn start(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle>;

    async fn set_machine_type(
        &self,
        zone: &str,
        name: &str,
        machine_type: &str,
    ) -> ExecutorResult<OperationHandle>;

    /// Snapshot a zonal disk, storing the snapshot in the given region
    async fn create_snapshot(
        &self,
        zone: &str,
        disk: &str,
        snapshot_name: &str,
        storage_region: &str,
    ) -> ExecutorResult<OperationHandle>;

    async fn insert_instance(&self, zone: &str, spec: &InstanceSpec) -> ExecutorResult<OperationHandle>;

    async fn delete_instance(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle>;

    /// Block until the operation is done; fails if it finished with an error
    async fn wait_operation(&self, operation: &OperationHandle) -> ExecutorResult<()>;
}

/// Last path segment of a resource URL (`.../zones/us-east1-b` -> `us-east1-b`)
pub fn resource_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
