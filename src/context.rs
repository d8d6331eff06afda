//! Application Context
//!
//! Single owner of the application caches and their cleanup timers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::cache::{
    shared, ApiCache, BoundedCache, Debouncer, ImageCache, ImageLoader, SharedCache,
    StatsSnapshot,
};
use crate::config::Config;
use crate::error::Result;
use crate::tasks::CleanupHandle;

#[derive(Debug, Clone, Serialize)]
pub struct AppCacheStats {
    pub api: StatsSnapshot,
    pub images: StatsSnapshot,
    pub general: StatsSnapshot,
}

// == App Context ==
/// Builds the API, image and general-purpose caches and hands them out by
/// reference. Dropping the context or calling [`shutdown`](Self::shutdown)
/// stops their cleanup tasks.
pub struct AppContext {
    api: ApiCache,
    images: ImageCache,
    general: SharedCache<Value>,
    general_writes: Debouncer<Value>,
    cleanup: Mutex<Vec<CleanupHandle>>,
}

impl AppContext {
    /// Creates the caches without background cleanup.
    pub fn new(config: &Config, loader: Arc<dyn ImageLoader>) -> Self {
        let general = shared(BoundedCache::new(
            config.general_cache_max_entries,
            Duration::from_millis(config.general_cache_ttl_ms),
        ));

        Self {
            api: ApiCache::new(
                config.api_cache_max_entries,
                Duration::from_millis(config.api_cache_ttl_ms),
            ),
            images: ImageCache::new(
                config.image_cache_max_entries,
                Duration::from_millis(config.image_cache_ttl_ms),
                loader,
            ),
            general_writes: Debouncer::new(general.clone()),
            general,
            cleanup: Mutex::new(Vec::new()),
        }
    }

    /// Creates the caches and starts their cleanup tasks. Needs a Tokio
    /// runtime. Fails on a zero cleanup interval.
    pub fn start(config: &Config, loader: Arc<dyn ImageLoader>) -> Result<Self> {
        let interval = config.app_cache_cleanup_interval()?;
        let mut context = Self::new(config, loader);

        let handles = vec![
            context.api.start_cleanup(interval),
            context.images.start_cleanup(interval),
            crate::tasks::spawn_cleanup_task(context.general.clone(), interval),
        ];
        context.cleanup = Mutex::new(handles);

        info!("Application caches started, cleanup every {:?}", interval);
        Ok(context)
    }

    pub fn api_cache(&self) -> &ApiCache {
        &self.api
    }

    pub fn image_cache(&self) -> &ImageCache {
        &self.images
    }

    pub fn general_cache(&self) -> &SharedCache<Value> {
        &self.general
    }

    /// Debounced writer into the general cache, for values that change in
    /// bursts (form drafts, scroll positions).
    pub fn general_writes(&self) -> &Debouncer<Value> {
        &self.general_writes
    }

    pub async fn stats(&self) -> AppCacheStats {
        AppCacheStats {
            api: self.api.stats().await,
            images: self.images.stats().await,
            general: self.general.read().await.stats(),
        }
    }

    /// Stops every cleanup task and drops pending debounced writes. Safe to
    /// call more than once.
    pub async fn shutdown(&self) {
        let dropped = self.general_writes.cancel_all();
        if dropped > 0 {
            info!("Dropped {} pending debounced writes", dropped);
        }

        let handles: Vec<CleanupHandle> = self.cleanup.lock().await.drain(..).collect();
        let count = handles.len();
        for handle in handles {
            handle.stop();
        }
        if count > 0 {
            info!("Stopped {} application cache cleanup tasks", count);
        }
    }

    /// Number of cleanup tasks still owned.
    pub async fn running_tasks(&self) -> usize {
        self.cleanup.lock().await.len()
    }
}
