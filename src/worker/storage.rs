//! Cache Storage Module
//!
//! Named partitions of request/response pairs, shared between the worker's
//! request handlers and the retention sweep. A persistent storage mirrors
//! every change to a directory per partition, so partitions survive a
//! restart and a new version can garbage-collect the old ones.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::worker::persist::{DiskPartitions, Partition};
use crate::worker::FetchResponse;

// == Cache Storage ==
/// Stand-in for the browser's cache storage.
///
/// Every operation touches a single key or partition under one lock, so
/// concurrent handlers never observe a half-written entry. Clones share the
/// same partitions. Disk failures are logged and do not fail the operation;
/// the in-memory partition stays authoritative until the next restart.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    partitions: Arc<RwLock<BTreeMap<String, Partition>>>,
    disk: Option<Arc<DiskPartitions>>,
}

impl CacheStorage {
    /// Memory-only storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage persisted under `root`, loading whatever partitions an
    /// earlier run left there.
    pub async fn persistent(root: impl Into<PathBuf>) -> Result<Self> {
        let disk = DiskPartitions::new(root.into());
        let partitions = disk.load_all().await?;
        info!(
            "Opened cache storage at {} ({} partitions)",
            disk.root().display(),
            partitions.len()
        );

        Ok(Self {
            partitions: Arc::new(RwLock::new(partitions)),
            disk: Some(Arc::new(disk)),
        })
    }

    /// Creates the partition if it does not exist yet.
    pub async fn open(&self, name: &str) {
        let mut partitions = self.partitions.write().await;
        if partitions.contains_key(name) {
            return;
        }
        let partition = partitions.entry(name.to_string()).or_default();
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.write_meta(name, partition).await {
                warn!("Failed to create partition {} on disk: {}", name, e);
            }
        }
    }

    pub async fn has(&self, name: &str) -> bool {
        self.partitions.read().await.contains_key(name)
    }

    /// Partition names in lexical order.
    pub async fn keys(&self) -> Vec<String> {
        self.partitions.read().await.keys().cloned().collect()
    }

    /// Deletes a whole partition. Returns false if it did not exist.
    pub async fn delete(&self, name: &str) -> bool {
        let mut partitions = self.partitions.write().await;
        let existed = partitions.remove(name).is_some();
        if existed {
            if let Some(disk) = &self.disk {
                if let Err(e) = disk.remove_partition(name).await {
                    warn!("Failed to delete partition {} from disk: {}", name, e);
                }
            }
        }
        existed
    }

    /// Stores a response, creating the partition on first use.
    pub async fn put(&self, name: &str, key: impl Into<String>, response: FetchResponse) {
        let key = key.into();
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(name.to_string()).or_default();

        let Some(disk) = &self.disk else {
            partition.entries.insert(key, response);
            return;
        };

        let file = partition.file_for(&key);
        let body = response.body.clone();
        partition.entries.insert(key, response);
        if let Err(e) = disk.write_entry(name, &file, &body, partition).await {
            warn!("Failed to persist entry in {}: {}", name, e);
        }
    }

    pub async fn match_in(&self, name: &str, key: &str) -> Option<FetchResponse> {
        self.partitions
            .read()
            .await
            .get(name)
            .and_then(|partition| partition.entries.get(key))
            .cloned()
    }

    /// First match across all partitions.
    pub async fn match_any(&self, key: &str) -> Option<FetchResponse> {
        self.partitions
            .read()
            .await
            .values()
            .find_map(|partition| partition.entries.get(key))
            .cloned()
    }

    pub async fn entry_count(&self, name: &str) -> usize {
        self.partitions
            .read()
            .await
            .get(name)
            .map(|partition| partition.entries.len())
            .unwrap_or(0)
    }

    // == Retention ==
    /// Deletes every entry whose `date` header is more than `max_age` before
    /// `now`. Entries without a parseable date, or dated in the future, are
    /// kept. Returns the number of entries removed.
    pub async fn remove_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let mut partitions = self.partitions.write().await;
        let mut removed = 0;

        for (name, partition) in partitions.iter_mut() {
            let stale: Vec<String> = partition
                .entries
                .iter()
                .filter(|(_, response)| match response.date() {
                    Some(date) => now
                        .signed_duration_since(date)
                        .to_std()
                        .map(|age| age > max_age)
                        .unwrap_or(false),
                    None => false,
                })
                .map(|(key, _)| key.clone())
                .collect();
            if stale.is_empty() {
                continue;
            }

            let files: Vec<String> = stale
                .iter()
                .filter_map(|key| partition.remove(key))
                .collect();
            debug!("Retention removed {} entries from {}", stale.len(), name);
            removed += stale.len();

            if let Some(disk) = &self.disk {
                let persisted = match disk.write_meta(name, partition).await {
                    Ok(()) => disk.remove_bodies(name, &files).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = persisted {
                    warn!("Failed to persist retention sweep of {}: {}", name, e);
                }
            }
        }

        removed
    }

    /// Deletes every partition, returning how many there were.
    pub async fn clear_all(&self) -> usize {
        let mut partitions = self.partitions.write().await;
        let count = partitions.len();
        if let Some(disk) = &self.disk {
            for name in partitions.keys() {
                if let Err(e) = disk.remove_partition(name).await {
                    warn!("Failed to delete partition {} from disk: {}", name, e);
                }
            }
        }
        partitions.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn response(body: &'static str) -> FetchResponse {
        FetchResponse::new(StatusCode::OK, body)
    }

    #[tokio::test]
    async fn test_open_put_match() {
        let storage = CacheStorage::new();

        storage.open("static-v1").await;
        assert!(storage.has("static-v1").await);
        assert_eq!(storage.entry_count("static-v1").await, 0);

        storage.put("dynamic-v1", "http://site.test/a", response("a")).await;
        assert!(storage.has("dynamic-v1").await);

        let hit = storage.match_in("dynamic-v1", "http://site.test/a").await.unwrap();
        assert_eq!(&hit.body[..], b"a");
        assert!(storage.match_in("static-v1", "http://site.test/a").await.is_none());
        assert!(storage.match_any("http://site.test/a").await.is_some());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let storage = CacheStorage::new();

        storage.put("p", "k", response("old")).await;
        storage.put("p", "k", response("new")).await;

        assert_eq!(storage.entry_count("p").await, 1);
        assert_eq!(&storage.match_in("p", "k").await.unwrap().body[..], b"new");
    }

    #[tokio::test]
    async fn test_delete_partition() {
        let storage = CacheStorage::new();

        storage.put("p", "k1", response("1")).await;
        storage.put("p", "k2", response("2")).await;

        assert!(storage.delete("p").await);
        assert!(!storage.delete("p").await);
        assert!(storage.keys().await.is_empty());
        assert!(storage.match_any("k1").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_older_than() {
        let storage = CacheStorage::new();
        let now = Utc::now();

        let old = response("old").with_date(now - chrono::Duration::days(31));
        let recent = response("recent").with_date(now - chrono::Duration::days(1));
        let future = response("future").with_date(now + chrono::Duration::days(1));
        let undated = response("undated");

        storage.put("dynamic-v1", "old", old).await;
        storage.put("dynamic-v1", "recent", recent).await;
        storage.put("static-v1", "future", future).await;
        storage.put("static-v1", "undated", undated).await;

        let removed = storage.remove_older_than(30 * DAY, now).await;

        assert_eq!(removed, 1);
        assert!(storage.match_any("old").await.is_none());
        assert!(storage.match_any("recent").await.is_some());
        assert!(storage.match_any("future").await.is_some());
        assert!(storage.match_any("undated").await.is_some());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let storage = CacheStorage::new();

        storage.open("static-v1").await;
        storage.open("dynamic-v1").await;

        assert_eq!(storage.clear_all().await, 2);
        assert!(storage.keys().await.is_empty());
    }

    // == Persistence ==

    #[tokio::test]
    async fn test_partitions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let storage = CacheStorage::persistent(dir.path()).await.unwrap();
        let mut jpeg = response("jpeg");
        jpeg.headers
            .insert("content-type", HeaderValue::from_static("image/jpeg"));
        storage.put("dynamic-v1", "http://site.test/a.jpg", jpeg).await;
        storage.put("static-v1", "http://site.test/", response("old shell")).await;
        storage.put("static-v1", "http://site.test/", response("shell")).await;
        storage.open("empty-v1").await;
        drop(storage);

        let reopened = CacheStorage::persistent(dir.path()).await.unwrap();

        assert_eq!(reopened.keys().await, vec!["dynamic-v1", "empty-v1", "static-v1"]);
        let image = reopened
            .match_in("dynamic-v1", "http://site.test/a.jpg")
            .await
            .unwrap();
        assert_eq!(&image.body[..], b"jpeg");
        assert_eq!(image.headers.get("content-type").unwrap(), "image/jpeg");
        let shell = reopened.match_in("static-v1", "http://site.test/").await.unwrap();
        assert_eq!(&shell.body[..], b"shell");
        assert_eq!(reopened.entry_count("static-v1").await, 1);
    }

    #[tokio::test]
    async fn test_deleted_partitions_leave_disk() {
        let dir = tempfile::tempdir().unwrap();

        let storage = CacheStorage::persistent(dir.path()).await.unwrap();
        storage.put("static-v1", "k", response("1")).await;
        storage.put("dynamic-v1", "k", response("2")).await;

        assert!(storage.delete("static-v1").await);
        assert!(!dir.path().join("static-v1").exists());
        assert!(dir.path().join("dynamic-v1").exists());

        assert_eq!(storage.clear_all().await, 1);
        assert!(!dir.path().join("dynamic-v1").exists());

        let reopened = CacheStorage::persistent(dir.path()).await.unwrap();
        assert!(reopened.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_retention_sweep_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        let storage = CacheStorage::persistent(dir.path()).await.unwrap();
        let old = response("old").with_date(now - chrono::Duration::days(31));
        storage.put("dynamic-v1", "old", old).await;
        storage.put("dynamic-v1", "fresh", response("fresh")).await;

        assert_eq!(storage.remove_older_than(30 * DAY, now).await, 1);

        let reopened = CacheStorage::persistent(dir.path()).await.unwrap();
        assert!(reopened.match_any("old").await.is_none());
        assert!(reopened.match_any("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_partition_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("static-v1")).unwrap();
        std::fs::write(dir.path().join("static-v1").join("_meta.json"), b"{not json").unwrap();

        let storage = CacheStorage::persistent(dir.path()).await.unwrap();
        storage.put("dynamic-v1", "k", response("1")).await;

        assert_eq!(storage.keys().await, vec!["dynamic-v1"]);
    }
}
