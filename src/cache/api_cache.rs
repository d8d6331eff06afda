//! API response cache
//!
//! Memoizes responses of external APIs keyed by URL and request parameters.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{shared, BoundedCache, SharedCache, StatsSnapshot};
use crate::error::Result;
use crate::tasks::{spawn_cleanup_task, CleanupHandle};

pub const DEFAULT_API_CACHE_SIZE: usize = 50;
pub const DEFAULT_API_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Longest `api:<url>:<params>` key accepted. Query-heavy calls produce keys
/// well past the general cache's limit.
pub const API_MAX_KEY_LENGTH: usize = 64 * 1024;

/// What the cache keeps for one API call.
#[derive(Debug, Clone, Serialize)]
pub struct ApiCacheValue {
    pub data: Value,
    /// Unix milliseconds at which the response was stored
    pub timestamp: u64,
    pub url: String,
    pub params: Option<Value>,
}

// == Api Cache ==
#[derive(Debug, Clone)]
pub struct ApiCache {
    inner: SharedCache<ApiCacheValue>,
}

impl ApiCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: shared(
                BoundedCache::new(max_size, default_ttl).with_max_key_length(API_MAX_KEY_LENGTH),
            ),
        }
    }

    /// Stores `data` as the response of `url` called with `params`.
    ///
    /// Fails with `InvalidKey` if the url and canonical params together
    /// exceed [`API_MAX_KEY_LENGTH`] bytes.
    pub async fn cache_api_response(
        &self,
        url: &str,
        params: Option<&Value>,
        data: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = api_key(url, params);
        let value = ApiCacheValue {
            data,
            timestamp: current_timestamp_ms(),
            url: url.to_string(),
            params: params.cloned(),
        };
        self.inner.write().await.set(key, value, ttl)
    }

    /// Returns the cached response of `url` called with `params`, if live.
    pub async fn get_api_response(&self, url: &str, params: Option<&Value>) -> Option<Value> {
        let key = api_key(url, params);
        self.inner
            .write()
            .await
            .get(&key)
            .ok()
            .map(|cached| cached.data)
    }

    /// Deletes every cached call whose key contains `pattern`.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let mut cache = self.inner.write().await;
        let keys = cache.keys_matching(pattern);
        for key in &keys {
            cache.delete(key);
        }
        debug!("Invalidated {} API responses matching '{}'", keys.len(), pattern);
        keys.len()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.inner.read().await.stats()
    }

    /// Starts the periodic expiry sweep for this cache.
    pub fn start_cleanup(&self, interval: Duration) -> CleanupHandle {
        spawn_cleanup_task(self.inner.clone(), interval)
    }

    pub fn shared(&self) -> &SharedCache<ApiCacheValue> {
        &self.inner
    }
}

impl Default for ApiCache {
    fn default() -> Self {
        Self::new(DEFAULT_API_CACHE_SIZE, DEFAULT_API_CACHE_TTL)
    }
}

// == Key Generation ==
/// Builds `api:<url>:<params>` where params are serialized with object keys
/// sorted at every depth, so `{a,b}` and `{b,a}` share an entry.
pub fn api_key(url: &str, params: Option<&Value>) -> String {
    let params = params
        .map(|p| canonicalize(p).to_string())
        .unwrap_or_default();
    format!("api:{}:{}", url, params)
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
