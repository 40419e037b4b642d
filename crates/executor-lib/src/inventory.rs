//! Fleet inventory and zone resolution

use crate::compute::ComputeApi;
use crate::error::{ExecutorError, ExecutorResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on inventory pages scanned for a single lookup
const MAX_INVENTORY_PAGES: usize = 10_000;

/// Maps instance identifiers to their zone
#[async_trait]
pub trait FleetInventory: Send + Sync {
    /// Resolve the zone hosting an instance, or fail with `NotFound`
    async fn resolve_zone(&self, instance_id: &str) -> ExecutorResult<String>;
}

/// Zone resolver that scans the aggregated compute inventory.
///
/// No caching across calls; each lookup walks the pages until a match.
pub struct ComputeFleetInventory {
    compute: Arc<dyn ComputeApi>,
}

impl ComputeFleetInventory {
    pub fn new(compute: Arc<dyn ComputeApi>) -> Self {
        Self { compute }
    }
}

#[async_trait]
impl FleetInventory for ComputeFleetInventory {
    async fn resolve_zone(&self, instance_id: &str) -> ExecutorResult<String> {
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.compute.aggregated_list(page_token.as_deref()).await?;
            pages += 1;

            if let Some(group) = page
                .zones
                .iter()
                .find(|group| group.instances.iter().any(|name| name == instance_id))
            {
                debug!(instance_id = %instance_id, zone = %group.zone, pages, "Resolved instance zone");
                return Ok(group.zone.clone());
            }

            match page.next_page_token {
                Some(token) if pages < MAX_INVENTORY_PAGES => page_token = Some(token),
                _ => break,
            }
        }

        Err(ExecutorError::NotFound(format!(
            "zone not found for instance {}",
            instance_id
        )))
    }
}
