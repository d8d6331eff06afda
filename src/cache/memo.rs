//! Shared cache handle and memoization helpers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::BoundedCache;
use crate::error::Result;

/// A [`BoundedCache`] shared across tasks.
///
/// The write lock covers the whole check/evict/insert sequence of `set`, and
/// `get` needs it too because reads update recency.
pub type SharedCache<V> = Arc<RwLock<BoundedCache<V>>>;

/// Wraps a cache for sharing.
pub fn shared<V>(cache: BoundedCache<V>) -> SharedCache<V> {
    Arc::new(RwLock::new(cache))
}

// == Memoize ==
/// Returns the cached value for `key`, or runs `loader`, stores its result and
/// returns it.
///
/// Loader errors are passed through and nothing is cached for them.
pub async fn memoize<V, F, Fut>(
    cache: &SharedCache<V>,
    key: &str,
    ttl: Option<Duration>,
    loader: F,
) -> Result<V>
where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
{
    let cached = cache.write().await.get(key);
    if let Ok(value) = cached {
        return Ok(value);
    }

    let value = loader().await?;
    cache.write().await.set(key, value.clone(), ttl)?;
    Ok(value)
}

// == Warm ==
/// Loads every key that is not already cached. Returns how many were loaded.
pub async fn warm<V, F, Fut>(cache: &SharedCache<V>, keys: &[String], mut loader: F) -> Result<usize>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<V>>,
{
    let mut loaded = 0;

    for key in keys {
        if cache.write().await.has(key) {
            continue;
        }
        let value = loader(key.clone()).await?;
        cache.write().await.set(key.clone(), value, None)?;
        loaded += 1;
    }

    debug!("Cache warm-up loaded {} of {} keys", loaded, keys.len());
    Ok(loaded)
}

// == Set Many ==
/// Stores a batch of entries under a single lock.
pub async fn set_many<V, I>(cache: &SharedCache<V>, entries: I) -> Result<()>
where
    I: IntoIterator<Item = (String, V, Option<Duration>)>,
{
    let mut guard = cache.write().await;
    for (key, value, ttl) in entries {
        guard.set(key, value, ttl)?;
    }
    Ok(())
}

// == Debounced Set ==
/// Delays writes so that a burst of updates to one key stores only the last
/// value.
///
/// Every key has at most one pending timer; a newer call cancels it. Dropping
/// the debouncer cancels everything still pending.
pub struct Debouncer<V> {
    cache: SharedCache<V>,
    pending: Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>,
    generation: Arc<AtomicU64>,
}

impl<V> Debouncer<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(cache: SharedCache<V>) -> Self {
        Self {
            cache,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stores `value` under `key` once `delay` passes without another call
    /// for the same key.
    pub fn debounced_set(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        delay: Duration,
    ) {
        let key = key.into();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let cache = self.cache.clone();
        let pending = self.pending.clone();
        let task_key = key.clone();

        let mut timers = lock(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut timers = lock(&pending);
                if matches!(timers.get(&task_key), Some((current, _)) if *current == generation) {
                    timers.remove(&task_key);
                }
            }

            if let Err(e) = cache.write().await.set(task_key.clone(), value, ttl) {
                warn!("Debounced write of '{}' failed: {}", task_key, e);
            }
        });

        if let Some((_, previous)) = timers.insert(key, (generation, handle)) {
            previous.abort();
        }
    }

    /// Cancels every pending write. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let mut timers = lock(&self.pending);
        let count = timers.len();
        for (_, (_, handle)) in timers.drain() {
            handle.abort();
        }
        count
    }
}

impl<V> Drop for Debouncer<V> {
    fn drop(&mut self) {
        for (_, (_, handle)) in lock(&self.pending).drain() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
