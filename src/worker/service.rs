//! Service Worker Module
//!
//! Lifecycle (install, activate) and request interception for the versioned
//! cache partitions.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CacheError, Result};
use crate::worker::{
    cache_key, classify, CacheStorage, FetchRequest, FetchResponse, Fetcher, PartitionNames,
    PartitionRole, Strategy,
};

/// Retention window for cached responses, keyed off their `date` header
pub const DEFAULT_RETENTION_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Interval between retention sweeps
pub const DEFAULT_RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Assets precached at install time
pub const DEFAULT_PRECACHE: [&str; 5] = [
    "/",
    "/videos/church-background.mp4",
    "/community.jpg",
    "/teaching.jpg",
    "/service.jpg",
];

// == Worker State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Unregistered,
    Installing,
    /// Installed and waiting for activation
    Installed,
    Activating,
    /// Controlling clients and serving requests
    Activated,
}

// == Install Policy ==
/// What to do when a manifest asset cannot be cached during install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallPolicy {
    /// Log the failure and carry on
    #[default]
    BestEffort,
    /// Fail the install; the worker stays unregistered
    Strict,
}

impl FromStr for InstallPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            "strict" => Ok(Self::Strict),
            other => Err(CacheError::Config(format!("unknown install policy '{}'", other))),
        }
    }
}

// == Worker Config ==
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Origin every intercepted path is resolved against
    pub origin: Url,
    /// Deployment version; changes rotate the partitions
    pub version: String,
    /// Paths under this prefix are served cache-first from the static partition
    pub static_prefix: String,
    /// Paths fetched and stored at install
    pub precache: Vec<String>,
    pub install_policy: InstallPolicy,
    /// Deadline for network-first fetches before falling back to cache
    pub network_timeout: Option<Duration>,
    pub retention_interval: Duration,
    pub retention_max_age: Duration,
}

impl WorkerConfig {
    pub fn new(origin: Url, version: impl Into<String>) -> Self {
        Self {
            origin,
            version: version.into(),
            static_prefix: "/static/".to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            install_policy: InstallPolicy::default(),
            network_timeout: Some(Duration::from_secs(10)),
            retention_interval: DEFAULT_RETENTION_INTERVAL,
            retention_max_age: DEFAULT_RETENTION_MAX_AGE,
        }
    }
}

// == Reports ==
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

/// Outcome of replacing the running worker with a new version.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub version: String,
    pub install: InstallReport,
    /// Partitions garbage-collected on activation
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub name: String,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub version: String,
    pub static_partition: String,
    pub dynamic_partition: String,
    pub partitions: Vec<PartitionSummary>,
}

// == Service Worker ==
pub struct ServiceWorker {
    config: WorkerConfig,
    names: PartitionNames,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<WorkerState>,
}

impl ServiceWorker {
    pub fn new(config: WorkerConfig, storage: CacheStorage, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            names: PartitionNames::for_version(&config.version),
            config,
            storage,
            fetcher,
            state: RwLock::new(WorkerState::Unregistered),
        }
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub fn names(&self) -> &PartitionNames {
        &self.names
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// An unregistered worker for `version` that shares this worker's storage
    /// and network, so it can install beside it.
    pub fn successor(&self, version: &str) -> Result<ServiceWorker> {
        if version == self.config.version {
            return Err(CacheError::InvalidState(format!(
                "version {} is already running",
                version
            )));
        }
        let names = PartitionNames::try_for_version(version)?;

        let mut config = self.config.clone();
        config.version = version.to_string();
        Ok(Self {
            config,
            names,
            storage: self.storage.clone(),
            fetcher: Arc::clone(&self.fetcher),
            state: RwLock::new(WorkerState::Unregistered),
        })
    }

    // == Install ==
    /// Opens the static partition and fills it with the precache manifest.
    ///
    /// Failed assets are logged and listed in the report. Under
    /// [`InstallPolicy::Strict`] any failure aborts the install.
    pub async fn install(&self) -> Result<InstallReport> {
        self.transition(WorkerState::Unregistered, WorkerState::Installing)
            .await?;
        info!(
            "Installing worker {} ({} precache assets)",
            self.config.version,
            self.config.precache.len()
        );

        self.storage.open(&self.names.static_name).await;

        let mut report = InstallReport::default();
        for path in &self.config.precache {
            match self.precache_asset(path).await {
                Ok(()) => report.cached.push(path.clone()),
                Err(e) => {
                    warn!("Failed to precache {}: {}", path, e);
                    report.failed.push(path.clone());
                }
            }
        }

        if self.config.install_policy == InstallPolicy::Strict && !report.failed.is_empty() {
            *self.state.write().await = WorkerState::Unregistered;
            return Err(CacheError::InstallFailed(format!(
                "could not precache {}",
                report.failed.join(", ")
            )));
        }

        *self.state.write().await = WorkerState::Installed;
        info!(
            "Worker {} installed ({} cached, {} failed), skipping wait",
            self.config.version,
            report.cached.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn precache_asset(&self, path: &str) -> Result<()> {
        let url = self.resolve(path)?;
        let request = FetchRequest::get(url);
        let response = self.fetch_with_timeout(&request).await?;

        let Some(stored) = response.storable() else {
            return Err(CacheError::Network(format!(
                "{} returned {}",
                path, response.status
            )));
        };

        self.storage
            .put(&self.names.static_name, request.cache_key(), stored)
            .await;
        Ok(())
    }

    // == Activate ==
    /// Deletes every partition that is not current for this version and
    /// starts serving. Returns the names of the deleted partitions.
    pub async fn activate(&self) -> Result<Vec<String>> {
        self.transition(WorkerState::Installed, WorkerState::Activating)
            .await?;

        let mut deleted = Vec::new();
        for name in self.storage.keys().await {
            if self.names.is_current(&name) {
                continue;
            }
            if self.storage.delete(&name).await {
                info!("Deleted stale cache partition {}", name);
                deleted.push(name);
            } else {
                warn!("Stale cache partition {} was already gone", name);
            }
        }

        *self.state.write().await = WorkerState::Activated;
        info!(
            "Worker {} activated, controlling clients",
            self.config.version
        );
        Ok(deleted)
    }

    async fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != from {
            return Err(CacheError::InvalidState(format!(
                "cannot move to {:?} from {:?}",
                to, *state
            )));
        }
        *state = to;
        Ok(())
    }

    // == Fetch ==
    /// Answers an intercepted request. Always produces a response: network
    /// failures end in a cached copy or the synthetic offline response.
    pub async fn handle_fetch(&self, request: FetchRequest) -> FetchResponse {
        if self.state().await != WorkerState::Activated {
            debug!("Worker not active, passing {} through", request.url);
            return self.passthrough(&request).await;
        }

        match classify(&request, &self.config.static_prefix) {
            Strategy::Passthrough => self.passthrough(&request).await,
            Strategy::CacheFirst(role) => self.cache_first(&request, role).await,
            Strategy::NetworkFirst => self.network_first(&request).await,
        }
    }

    async fn passthrough(&self, request: &FetchRequest) -> FetchResponse {
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {} failed: {}", request.method, request.url, e);
                FetchResponse::offline()
            }
        }
    }

    async fn cache_first(&self, request: &FetchRequest, role: PartitionRole) -> FetchResponse {
        let key = request.cache_key();

        if let Some(cached) = self.storage.match_any(&key).await {
            debug!("Cache hit for {}", key);
            return cached;
        }

        // A partial body must never be stored as the whole resource.
        match self.fetcher.fetch(&request.without_range()).await {
            Ok(response) => {
                self.store(self.names.name(role), request, &response).await;
                response
            }
            Err(e) => {
                warn!("Cache miss and network failure for {}: {}", key, e);
                FetchResponse::offline()
            }
        }
    }

    async fn network_first(&self, request: &FetchRequest) -> FetchResponse {
        let key = request.cache_key();

        let error = match self.fetch_with_timeout(request).await {
            Ok(response) => {
                self.store(&self.names.dynamic_name, request, &response).await;
                return response;
            }
            Err(e) => e,
        };

        warn!("Network failed for {} ({}), trying cache", key, error);

        if let Some(cached) = self.storage.match_any(&key).await {
            return cached;
        }

        if request.is_navigation() {
            if let Some(shell) = self.app_shell().await {
                debug!("Serving app shell for {}", key);
                return shell;
            }
        }

        FetchResponse::offline()
    }

    /// Stores a copy of `response` unless the request carried credentials or
    /// the response is not a complete `200`.
    async fn store(&self, partition: &str, request: &FetchRequest, response: &FetchResponse) {
        if request.has_credentials() {
            debug!("Not caching {}: request carries credentials", request.url);
            return;
        }
        match response.storable() {
            Some(stored) => self.storage.put(partition, request.cache_key(), stored).await,
            None => debug!("Not caching {}: status {}", request.url, response.status),
        }
    }

    /// The cached root document.
    async fn app_shell(&self) -> Option<FetchResponse> {
        let root = cache_key(&self.config.origin.join("/").ok()?);

        match self.storage.match_in(&self.names.static_name, &root).await {
            Some(shell) => Some(shell),
            None => self.storage.match_any(&root).await,
        }
    }

    async fn fetch_with_timeout(&self, request: &FetchRequest) -> Result<FetchResponse> {
        match self.config.network_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch(request))
                .await
                .map_err(|_| CacheError::Timeout(request.url.to_string()))?,
            None => self.fetcher.fetch(request).await,
        }
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.config
            .origin
            .join(path)
            .map_err(|e| CacheError::Config(format!("bad precache path '{}': {}", path, e)))
    }

    // == Maintenance ==
    /// Removes entries older than the retention window from every partition.
    pub async fn sweep_retention(&self) -> usize {
        self.storage
            .remove_older_than(self.config.retention_max_age, Utc::now())
            .await
    }

    /// Deletes every partition. Only ever triggered by a control message.
    pub async fn clear_all(&self) -> usize {
        let deleted = self.storage.clear_all().await;
        info!("Cleared all caches ({} partitions)", deleted);
        deleted
    }

    pub async fn status(&self) -> WorkerStatus {
        let mut partitions = Vec::new();
        for name in self.storage.keys().await {
            let entries = self.storage.entry_count(&name).await;
            partitions.push(PartitionSummary { name, entries });
        }

        WorkerStatus {
            state: self.state().await,
            version: self.config.version.clone(),
            static_partition: self.names.static_name.clone(),
            dynamic_partition: self.names.dynamic_name.clone(),
            partitions,
        }
    }
}
