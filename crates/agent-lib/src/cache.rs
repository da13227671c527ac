//! Latest-snapshot cache shared with the HTTP layer
//!
//! Readers get an `Arc` to an immutable snapshot, so they never see a
//! partially built one. Each publish carries the cycle number that produced
//! it; a slow cycle that finishes after a newer one is discarded.

use crate::models::StatusResponse;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Published {
    cycle: u64,
    status: Option<Arc<StatusResponse>>,
}

/// Thread-safe holder of the most recent snapshot
#[derive(Debug, Clone, Default)]
pub struct StatusCache {
    inner: Arc<RwLock<Published>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot unless a later cycle has already published
    ///
    /// Returns whether `status` became visible.
    pub async fn publish(&self, cycle: u64, status: StatusResponse) -> bool {
        let mut published = self.inner.write().await;
        if published.status.is_some() && cycle <= published.cycle {
            debug!(
                cycle = cycle,
                latest_cycle = published.cycle,
                "Discarding snapshot from an older cycle"
            );
            return false;
        }
        published.cycle = cycle;
        published.status = Some(Arc::new(status));
        true
    }

    /// Most recent snapshot, if any cycle has completed
    pub async fn latest(&self) -> Option<Arc<StatusResponse>> {
        self.inner.read().await.status.clone()
    }

    /// Cycle number of the visible snapshot
    pub async fn cycle(&self) -> Option<u64> {
        let published = self.inner.read().await;
        published.status.as_ref().map(|_| published.cycle)
    }
}
