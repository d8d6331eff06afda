//! Retention Sweep Task
//!
//! Periodically drops cached responses whose `date` header is older than the
//! retention window, so the dynamic partition cannot grow forever.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::tasks::CleanupHandle;
use crate::worker::CacheStorage;

/// Spawns a task that sweeps every partition of `storage` each `interval`.
pub fn spawn_retention_task(
    storage: CacheStorage,
    interval: Duration,
    max_age: Duration,
) -> CleanupHandle {
    let handle = tokio::spawn(async move {
        info!(
            "Starting retention sweep every {:?}, max age {:?}",
            interval, max_age
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = storage.remove_older_than(max_age, Utc::now()).await;

            if removed > 0 {
                info!("Retention sweep: removed {} stale responses", removed);
            } else {
                debug!("Retention sweep: nothing to remove");
            }
        }
    });

    CleanupHandle::new(handle)
}
