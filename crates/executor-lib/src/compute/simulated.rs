//! In-memory simulated compute fleet
//!
//! Models instance status transitions with a fixed latency so that the
//! lifecycle controller can be exercised end to end without a cloud
//! project. Calls and operations can be made to fail, and individual
//! instances can be stalled so that their transitions hold until released.

use super::{
    ComputeApi, InstanceDescription, InstanceSpec, InventoryPage, OperationHandle, ZoneInstances,
};
use crate::error::{ExecutorError, ExecutorResult};
use crate::models::InstanceStatus;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default time an instance spends in a transitional status
const DEFAULT_TRANSITION_DELAY: Duration = Duration::from_secs(2);

const DEFAULT_PAGE_SIZE: usize = 500;

/// Most recent calls kept for inspection; older ones are discarded
const MAX_RECORDED_CALLS: usize = 1024;

/// Externally visible state of a simulated instance
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedInstance {
    pub name: String,
    pub zone: String,
    pub status: InstanceStatus,
    pub machine_type: String,
    pub boot_disk: Option<String>,
}

#[derive(Debug)]
struct Entry {
    instance: SimulatedInstance,
    pending: Option<(InstanceStatus, Instant)>,
}

impl Entry {
    fn settle(&mut self, now: Instant, stalled: bool) {
        if stalled {
            return;
        }
        if let Some((target, ready_at)) = self.pending {
            if now >= ready_at {
                self.instance.status = target;
                self.pending = None;
            }
        }
    }
}

#[derive(Debug, Default)]
struct State {
    instances: BTreeMap<String, Entry>,
    snapshots: HashMap<String, String>,
    stalled: HashSet<String>,
    failing_calls: HashSet<String>,
    failing_operations: HashSet<String>,
    calls: VecDeque<String>,
    next_operation: u64,
}

impl State {
    fn record(&mut self, call: &str, target: &str) -> ExecutorResult<()> {
        if self.calls.len() == MAX_RECORDED_CALLS {
            self.calls.pop_front();
        }
        self.calls.push_back(format!("{} {}", call, target));
        if self.failing_calls.contains(call) {
            return Err(ExecutorError::Compute(format!(
                "simulated {} failure for {}",
                call, target
            )));
        }
        Ok(())
    }

    fn entry_mut(&mut self, zone: &str, name: &str) -> ExecutorResult<&mut Entry> {
        let now = Instant::now();
        let stalled = self.stalled.contains(name);
        match self.instances.get_mut(name) {
            Some(entry) if entry.instance.zone == zone => {
                entry.settle(now, stalled);
                Ok(entry)
            }
            _ => Err(ExecutorError::NotFound(format!(
                "instance {} in zone {}",
                name, zone
            ))),
        }
    }

    fn operation(&mut self, kind: &str, zone: &str, target: &str) -> OperationHandle {
        self.next_operation += 1;
        OperationHandle {
            name: format!("operation-{}-{}", self.next_operation, kind),
            zone: Some(zone.to_string()),
            target: target.to_string(),
        }
    }
}

/// In-memory compute control plane
pub struct SimulatedCompute {
    state: Mutex<State>,
    transition_delay: Duration,
    page_size: usize,
}

impl Default for SimulatedCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCompute {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            transition_delay: DEFAULT_TRANSITION_DELAY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_transition_delay(mut self, delay: Duration) -> Self {
        self.transition_delay = delay;
        self
    }

    /// Limit instances per inventory page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add an instance whose boot disk shares its name
    pub fn with_instance(
        mut self,
        name: &str,
        zone: &str,
        machine_type: &str,
        status: InstanceStatus,
    ) -> Self {
        self.state.get_mut().instances.insert(
            name.to_string(),
            Entry {
                instance: SimulatedInstance {
                    name: name.to_string(),
                    zone: zone.to_string(),
                    status,
                    machine_type: machine_type.to_string(),
                    boot_disk: Some(name.to_string()),
                },
                pending: None,
            },
        );
        self
    }

    /// Make every call of the given kind (e.g. `"set_machine_type"`) fail when issued
    pub async fn fail_call(&self, call: &str) {
        self.state.lock().await.failing_calls.insert(call.to_string());
    }

    /// Make operations of the given kind finish with an error
    pub async fn fail_operation(&self, call: &str) {
        self.state
            .lock()
            .await
            .failing_operations
            .insert(call.to_string());
    }

    /// Freeze an instance in its current status
    pub async fn stall(&self, name: &str) {
        self.state.lock().await.stalled.insert(name.to_string());
    }

    /// Let a stalled instance finish its pending transition
    pub async fn unstall(&self, name: &str) {
        self.state.lock().await.stalled.remove(name);
    }

    /// Most recent mutating calls in the order they were issued, as `"<call> <target>"`
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.iter().cloned().collect()
    }

    /// Current settled state of an instance
    pub async fn instance(&self, name: &str) -> Option<SimulatedInstance> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let stalled = state.stalled.contains(name);
        state.instances.get_mut(name).map(|entry| {
            entry.settle(now, stalled);
            entry.instance.clone()
        })
    }

    pub async fn has_snapshot(&self, name: &str) -> bool {
        self.state.lock().await.snapshots.contains_key(name)
    }

    fn transition(&self, entry: &mut Entry, interim: InstanceStatus, target: InstanceStatus) {
        entry.instance.status = interim;
        entry.pending = Some((target, Instant::now() + self.transition_delay));
    }
}

#[async_trait]
impl ComputeApi for SimulatedCompute {
    async fn aggregated_list(&self, page_token: Option<&str>) -> ExecutorResult<InventoryPage> {
        let state = self.state.lock().await;

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ExecutorError::InvalidInput(format!("bad page token {}", token)))?,
            None => 0,
        };

        let mut all: Vec<(&str, &str)> = state
            .instances
            .values()
            .map(|e| (e.instance.zone.as_str(), e.instance.name.as_str()))
            .collect();
        all.sort();

        let page: Vec<_> = all.iter().skip(offset).take(self.page_size).collect();
        let mut zones: Vec<ZoneInstances> = Vec::new();
        for (zone, name) in page {
            match zones.last_mut() {
                Some(group) if group.zone == *zone => group.instances.push(name.to_string()),
                _ => zones.push(ZoneInstances {
                    zone: zone.to_string(),
                    instances: vec![name.to_string()],
                }),
            }
        }

        let next = offset + self.page_size;
        Ok(InventoryPage {
            zones,
            next_page_token: (next < all.len()).then(|| next.to_string()),
        })
    }

    async fn get_instance(&self, zone: &str, name: &str) -> ExecutorResult<InstanceDescription> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(zone, name)?;
        let instance = &entry.instance;
        Ok(InstanceDescription {
            name: instance.name.clone(),
            zone: instance.zone.clone(),
            status: instance.status,
            machine_type: instance.machine_type.clone(),
            boot_disk: instance.boot_disk.clone(),
        })
    }

    async fn stop(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.record("stop", name)?;
        let entry = state.entry_mut(zone, name)?;
        if entry.instance.status != InstanceStatus::Terminated {
            self.transition(entry, InstanceStatus::Stopping, InstanceStatus::Terminated);
        }
        Ok(state.operation("stop", zone, name))
    }

    async fn start(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.record("start", name)?;
        let entry = state.entry_mut(zone, name)?;
        if entry.instance.status == InstanceStatus::Terminated {
            self.transition(entry, InstanceStatus::Staging, InstanceStatus::Running);
        }
        Ok(state.operation("start", zone, name))
    }

    async fn set_machine_type(
        &self,
        zone: &str,
        name: &str,
        machine_type: &str,
    ) -> ExecutorResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.record("set_machine_type", name)?;
        let entry = state.entry_mut(zone, name)?;
        if entry.instance.status != InstanceStatus::Terminated {
            return Err(ExecutorError::Compute(format!(
                "instance {} must be stopped to change machine type (status {})",
                name, entry.instance.status
            )));
        }
        entry.instance.machine_type = machine_type.to_string();
        Ok(state.operation("set_machine_type", zone, name))
    }

    async fn create_snapshot(
        &self,
        zone: &str,
        disk: &str,
        snapshot_name: &str,
        _storage_region: &str,
    ) -> ExecutorResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.record("create_snapshot", disk)?;
        let disk_exists = state
            .instances
            .values()
            .any(|e| e.instance.zone == zone && e.instance.boot_disk.as_deref() == Some(disk));
        if !disk_exists {
            return Err(ExecutorError::NotFound(format!("disk {} in zone {}", disk, zone)));
        }
        state
            .snapshots
            .insert(snapshot_name.to_string(), disk.to_string());
        Ok(state.operation("create_snapshot", zone, snapshot_name))
    }

    async fn insert_instance(&self, zone: &str, spec: &InstanceSpec) -> ExecutorResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.record("insert_instance", &spec.name)?;
        if !state.snapshots.contains_key(&spec.source_snapshot) {
            return Err(ExecutorError::Compute(format!(
                "snapshot {} does not exist",
                spec.source_snapshot
            )));
        }
        if state.instances.contains_key(&spec.name) {
            return Err(ExecutorError::Compute(format!(
                "instance {} already exists",
                spec.name
            )));
        }

        let mut entry = Entry {
            instance: SimulatedInstance {
                name: spec.name.clone(),
                zone: zone.to_string(),
                status: InstanceStatus::Provisioning,
                machine_type: spec.machine_type.clone(),
                boot_disk: Some(spec.name.clone()),
            },
            pending: None,
        };
        self.transition(&mut entry, InstanceStatus::Provisioning, InstanceStatus::Running);
        state.instances.insert(spec.name.clone(), entry);
        Ok(state.operation("insert_instance", zone, &spec.name))
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle> {
        let mut state = self.state.lock().await;
        state.record("delete_instance", name)?;
        state.entry_mut(zone, name)?;
        state.instances.remove(name);
        Ok(state.operation("delete_instance", zone, name))
    }

    async fn wait_operation(&self, operation: &OperationHandle) -> ExecutorResult<()> {
        let state = self.state.lock().await;
        let failed = state
            .failing_operations
            .iter()
            .any(|kind| operation.name.ends_with(&format!("-{}", kind)));
        if failed {
            return Err(ExecutorError::Compute(format!(
                "operation {} on {} finished with an error",
                operation.name, operation.target
            )));
        }
        Ok(())
    }
}
