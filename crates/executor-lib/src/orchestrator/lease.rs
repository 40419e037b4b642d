//! Per-instance migration leases

use crate::error::{ExecutorError, ExecutorResult};
use crate::observability::ExecutorMetrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Registry of instances with a migration in flight.
///
/// Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct MigrationLeases {
    held: Arc<DashMap<String, i64>>,
}

impl MigrationLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for an instance, failing if another migration holds it
    pub fn try_acquire(&self, instance_id: &str) -> ExecutorResult<MigrationLease> {
        let lease = match self.held.entry(instance_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ExecutorError::MigrationInProgress(instance_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(chrono::Utc::now().timestamp());
                MigrationLease {
                    instance_id: instance_id.to_string(),
                    held: self.held.clone(),
                }
            }
        };
        // The shard lock of the entry must be released before counting
        publish_in_flight(&self.held);
        Ok(lease)
    }

    pub fn is_held(&self, instance_id: &str) -> bool {
        self.held.contains_key(instance_id)
    }

    /// Instance ids currently leased, sorted
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.held.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Ownership of one instance's migration; released on drop
#[derive(Debug)]
pub struct MigrationLease {
    instance_id: String,
    held: Arc<DashMap<String, i64>>,
}

impl MigrationLease {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// Runs on every exit path, including a cancelled migration future
impl Drop for MigrationLease {
    fn drop(&mut self) {
        self.held.remove(&self.instance_id);
        publish_in_flight(&self.held);
    }
}

fn publish_in_flight(held: &DashMap<String, i64>) {
    ExecutorMetrics::new().set_in_flight(held.len() as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_until_release() {
        let leases = MigrationLeases::new();

        let lease = leases.try_acquire("vm-1").unwrap();
        assert_eq!(lease.instance_id(), "vm-1");
        assert!(leases.is_held("vm-1"));

        let err = leases.try_acquire("vm-1").unwrap_err();
        assert!(matches!(err, ExecutorError::MigrationInProgress(ref id) if id == "vm-1"));

        drop(lease);
        assert!(!leases.is_held("vm-1"));
        assert!(leases.try_acquire("vm-1").is_ok());
    }

    #[test]
    fn test_distinct_instances_lease_independently() {
        let leases = MigrationLeases::new();
        let _a = leases.try_acquire("vm-b").unwrap();
        let _b = leases.try_acquire("vm-a").unwrap();

        assert_eq!(leases.len(), 2);
        assert_eq!(leases.active(), vec!["vm-a", "vm-b"]);
    }

    #[tokio::test]
    async fn test_lease_released_when_migration_future_is_dropped() {
        let leases = MigrationLeases::new();
        let held = leases.clone();
        let migration = tokio::spawn(async move {
            let _lease = held.try_acquire("vm-1").unwrap();
            std::future::pending::<()>().await;
        });
        while !leases.is_held("vm-1") {
            tokio::task::yield_now().await;
        }

        migration.abort();
        assert!(migration.await.unwrap_err().is_cancelled());

        assert!(!leases.is_held("vm-1"));
        assert!(leases.is_empty());
    }
}
