//! TTL Cleanup Task
//!
//! Background task that periodically removes expired application cache
//! entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::SharedCache;

// == Cleanup Handle ==
/// Owner of a periodic background task.
///
/// The task stops when [`stop`](Self::stop) is called or the handle is
/// dropped.
#[derive(Debug)]
pub struct CleanupHandle {
    handle: JoinHandle<()>,
}

impl CleanupHandle {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Cancels the task.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns a task that calls `cleanup()` on the cache every `interval`.
///
/// # Example
/// ```ignore
/// let cache = shared(BoundedCache::<String>::new(100, Duration::from_secs(300)));
/// let cleanup = spawn_cleanup_task(cache.clone(), Duration::from_secs(60));
/// // Later, on teardown:
/// cleanup.stop();
/// ```
pub fn spawn_cleanup_task<V>(cache: SharedCache<V>, interval: Duration) -> CleanupHandle
where
    V: Send + Sync + 'static,
{
    let handle = tokio::spawn(async move {
        info!("Starting TTL cleanup task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.write().await.cleanup();

            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    });

    CleanupHandle::new(handle)
}
