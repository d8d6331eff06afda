//! On-disk layout of the cache partitions.
//!
//! Each partition is a directory under the cache root:
//!   - `_meta.json` maps request keys to status, headers and body file
//!   - `<n>.body` holds one response body
//!
//! Files are written to a temporary name and renamed into place.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::worker::FetchResponse;

const META_FILE: &str = "_meta.json";

// == In-memory Partition ==
/// One partition as held in memory, with the body file of each entry.
#[derive(Debug, Default)]
pub(super) struct Partition {
    pub entries: HashMap<String, FetchResponse>,
    pub files: HashMap<String, String>,
    pub next_file: u64,
}

impl Partition {
    /// Body file for `key`, allocating a new one for unknown keys.
    pub fn file_for(&mut self, key: &str) -> String {
        if let Some(file) = self.files.get(key) {
            return file.clone();
        }
        let file = format!("{}.body", self.next_file);
        self.next_file += 1;
        self.files.insert(key.to_string(), file.clone());
        file
    }

    /// Drops `key`, returning its body file if it had one.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key);
        self.files.remove(key)
    }

    fn meta(&self) -> PartitionMeta {
        let entries = self
            .entries
            .iter()
            .filter_map(|(key, response)| {
                let file = self.files.get(key)?.clone();
                Some((key.clone(), StoredEntry::new(file, response)))
            })
            .collect();

        PartitionMeta {
            next_file: self.next_file,
            entries,
        }
    }
}

// == Metadata ==
#[derive(Debug, Default, Serialize, Deserialize)]
struct PartitionMeta {
    next_file: u64,
    entries: BTreeMap<String, StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    file: String,
    status: u16,
    headers: Vec<(String, String)>,
}

impl StoredEntry {
    fn new(file: String, response: &FetchResponse) -> Self {
        Self {
            file,
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        }
    }

    fn into_response(self, body: Bytes) -> Option<FetchResponse> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.append(name, value);
            }
        }
        Some(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

// == Disk Partitions ==
/// Root directory of the persisted partitions.
#[derive(Debug)]
pub(super) struct DiskPartitions {
    root: PathBuf,
}

impl DiskPartitions {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads every partition under the root, creating the root if needed.
    ///
    /// Unreadable partitions and entries whose body is missing are skipped
    /// with a warning.
    pub async fn load_all(&self) -> Result<BTreeMap<String, Partition>> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        let mut partitions = BTreeMap::new();
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        while let Some(item) = dir.next_entry().await.map_err(|e| io_error(&self.root, e))? {
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_dir = item.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_safe_name(&name) || !is_dir {
                continue;
            }
            match self.load(&name).await {
                Ok(partition) => {
                    debug!("Loaded partition {} ({} entries)", name, partition.entries.len());
                    partitions.insert(name, partition);
                }
                Err(e) => warn!("Skipping unreadable partition {}: {}", name, e),
            }
        }

        Ok(partitions)
    }

    async fn load(&self, name: &str) -> Result<Partition> {
        let dir = self.dir(name)?;
        let meta_path = dir.join(META_FILE);
        let raw = fs::read(&meta_path)
            .await
            .map_err(|e| io_error(&meta_path, e))?;
        let meta: PartitionMeta = serde_json::from_slice(&raw)
            .map_err(|e| CacheError::Storage(format!("{}: {}", meta_path.display(), e)))?;

        let mut partition = Partition {
            next_file: meta.next_file,
            ..Partition::default()
        };
        for (key, stored) in meta.entries {
            if !is_safe_name(&stored.file) {
                continue;
            }
            let body = match fs::read(dir.join(&stored.file)).await {
                Ok(body) => Bytes::from(body),
                Err(e) => {
                    warn!("Dropping {} from {}: body unreadable ({})", key, name, e);
                    continue;
                }
            };
            let file = stored.file.clone();
            if let Some(response) = stored.into_response(body) {
                partition.files.insert(key.clone(), file);
                partition.entries.insert(key, response);
            }
        }
        Ok(partition)
    }

    /// Writes one body and the partition index.
    pub async fn write_entry(
        &self,
        name: &str,
        file: &str,
        body: &[u8],
        partition: &Partition,
    ) -> Result<()> {
        let dir = self.dir(name)?;
        fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        write_atomic(&dir.join(file), body).await?;
        self.write_meta(name, partition).await
    }

    /// Rewrites the partition index, creating the directory if needed.
    pub async fn write_meta(&self, name: &str, partition: &Partition) -> Result<()> {
        let dir = self.dir(name)?;
        fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        let raw = serde_json::to_vec(&partition.meta())
            .map_err(|e| CacheError::Storage(format!("{}: {}", name, e)))?;
        write_atomic(&dir.join(META_FILE), &raw).await
    }

    pub async fn remove_bodies(&self, name: &str, files: &[String]) -> Result<()> {
        let dir = self.dir(name)?;
        for file in files {
            let path = dir.join(file);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Ok(())
    }

    pub async fn remove_partition(&self, name: &str) -> Result<()> {
        let dir = self.dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    fn dir(&self, name: &str) -> Result<PathBuf> {
        if !is_safe_name(name) {
            return Err(CacheError::Storage(format!(
                "partition name '{}' cannot be stored on disk",
                name
            )));
        }
        Ok(self.root.join(name))
    }
}

/// A single path component: ASCII letters, digits, `.`, `_`, `-`, and not
/// only dots.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !name.chars().all(|c| c == '.')
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents)
        .await
        .map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, error: std::io::Error) -> CacheError {
    CacheError::Storage(format!("{}: {}", path.display(), error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_names() {
        assert!(is_safe_name("static-v1"));
        assert!(is_safe_name("12.body"));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("a/b"));
        assert!(!is_safe_name(""));
    }

    #[test]
    fn test_file_ids_are_stable_per_key() {
        let mut partition = Partition::default();

        let a = partition.file_for("a");
        let b = partition.file_for("b");

        assert_ne!(a, b);
        assert_eq!(partition.file_for("a"), a);
        assert_eq!(partition.remove("a"), Some(a));
        assert_eq!(partition.remove("a"), None);
    }

    #[test]
    fn test_headers_survive_metadata() {
        let mut response = FetchResponse::new(StatusCode::OK, "body");
        response
            .headers
            .insert("content-type", HeaderValue::from_static("image/jpeg"));

        let stored = StoredEntry::new("0.body".to_string(), &response);
        let raw = serde_json::to_vec(&stored).unwrap();
        let restored: StoredEntry = serde_json::from_slice(&raw).unwrap();
        let restored = restored.into_response(Bytes::from_static(b"body")).unwrap();

        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.headers.get("content-type").unwrap(), "image/jpeg");
        assert_eq!(&restored.body[..], b"body");
    }
}
