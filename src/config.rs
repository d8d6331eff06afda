//! Configuration Module
//!
//! Loads proxy, worker and application cache settings from environment
//! variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{CacheError, Result};
use crate::worker::{InstallPolicy, PartitionNames, WorkerConfig, DEFAULT_PRECACHE};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Runtime configuration.
///
/// All values can be configured via environment variables with sensible
/// defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port of the proxy
    pub server_port: u16,
    /// Site origin the proxy fronts
    pub origin_url: String,
    /// Deployment version used in partition names
    pub cache_version: String,
    /// Directory holding the worker's partitions; `None` keeps them in memory
    pub cache_dir: Option<PathBuf>,
    pub static_prefix: String,
    pub precache_manifest: Vec<String>,
    pub install_policy: InstallPolicy,
    /// Seconds before a network-first fetch falls back to cache, 0 = never
    pub network_timeout: u64,
    /// Seconds between retention sweeps
    pub retention_sweep_interval: u64,
    pub retention_max_age_days: u64,
    pub api_cache_max_entries: usize,
    pub api_cache_ttl_ms: u64,
    pub image_cache_max_entries: usize,
    pub image_cache_ttl_ms: u64,
    pub general_cache_max_entries: usize,
    pub general_cache_ttl_ms: u64,
    /// Milliseconds between application cache expiry sweeps
    pub app_cache_cleanup_interval_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - Proxy port (default: 3000)
    /// - `ORIGIN_URL` - Upstream origin (default: http://127.0.0.1:8080)
    /// - `CACHE_VERSION` - Partition version suffix (default: v1)
    /// - `CACHE_DIR` - Partition directory, empty for memory only (default: ./site-cache)
    /// - `STATIC_PREFIX` - Cache-first static path prefix (default: /static/)
    /// - `PRECACHE_MANIFEST` - Comma-separated install-time paths
    /// - `INSTALL_POLICY` - `best-effort` or `strict` (default: best-effort)
    /// - `NETWORK_TIMEOUT` - Seconds, 0 disables (default: 10)
    /// - `RETENTION_SWEEP_INTERVAL` - Seconds (default: 86400)
    /// - `RETENTION_MAX_AGE_DAYS` - Days (default: 30)
    /// - `API_CACHE_MAX_ENTRIES` / `API_CACHE_TTL_MS` (default: 50 / 300000)
    /// - `IMAGE_CACHE_MAX_ENTRIES` / `IMAGE_CACHE_TTL_MS` (default: 30 / 86400000)
    /// - `GENERAL_CACHE_MAX_ENTRIES` / `GENERAL_CACHE_TTL_MS` (default: 100 / 300000)
    /// - `APP_CACHE_CLEANUP_INTERVAL_MS` - (default: 60000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            origin_url: env::var("ORIGIN_URL").unwrap_or(defaults.origin_url),
            cache_version: env::var("CACHE_VERSION").unwrap_or(defaults.cache_version),
            cache_dir: match env::var("CACHE_DIR") {
                Ok(dir) if dir.trim().is_empty() => None,
                Ok(dir) => Some(PathBuf::from(dir)),
                Err(_) => defaults.cache_dir,
            },
            static_prefix: env::var("STATIC_PREFIX").unwrap_or(defaults.static_prefix),
            precache_manifest: env::var("PRECACHE_MANIFEST")
                .ok()
                .map(|v| parse_manifest(&v))
                .unwrap_or(defaults.precache_manifest),
            install_policy: parse_var("INSTALL_POLICY").unwrap_or(defaults.install_policy),
            network_timeout: parse_var("NETWORK_TIMEOUT").unwrap_or(defaults.network_timeout),
            retention_sweep_interval: parse_var("RETENTION_SWEEP_INTERVAL")
                .unwrap_or(defaults.retention_sweep_interval),
            retention_max_age_days: parse_var("RETENTION_MAX_AGE_DAYS")
                .unwrap_or(defaults.retention_max_age_days),
            api_cache_max_entries: parse_var("API_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.api_cache_max_entries),
            api_cache_ttl_ms: parse_var("API_CACHE_TTL_MS").unwrap_or(defaults.api_cache_ttl_ms),
            image_cache_max_entries: parse_var("IMAGE_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.image_cache_max_entries),
            image_cache_ttl_ms: parse_var("IMAGE_CACHE_TTL_MS")
                .unwrap_or(defaults.image_cache_ttl_ms),
            general_cache_max_entries: parse_var("GENERAL_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.general_cache_max_entries),
            general_cache_ttl_ms: parse_var("GENERAL_CACHE_TTL_MS")
                .unwrap_or(defaults.general_cache_ttl_ms),
            app_cache_cleanup_interval_ms: parse_var("APP_CACHE_CLEANUP_INTERVAL_MS")
                .unwrap_or(defaults.app_cache_cleanup_interval_ms),
        }
    }

    /// Builds the worker settings, validating the origin URL, the version and
    /// the retention settings.
    pub fn worker_config(&self) -> Result<WorkerConfig> {
        let origin = Url::parse(&self.origin_url)
            .map_err(|e| CacheError::Config(format!("ORIGIN_URL '{}': {}", self.origin_url, e)))?;
        if origin.cannot_be_a_base() {
            return Err(CacheError::Config(format!(
                "ORIGIN_URL '{}' cannot be used as a base",
                self.origin_url
            )));
        }

        PartitionNames::try_for_version(&self.cache_version)
            .map_err(|e| CacheError::Config(format!("CACHE_VERSION: {}", e)))?;

        if self.retention_sweep_interval == 0 {
            return Err(CacheError::Config(
                "RETENTION_SWEEP_INTERVAL must be at least 1 second".to_string(),
            ));
        }
        let retention_max_age = self
            .retention_max_age_days
            .checked_mul(SECONDS_PER_DAY)
            .ok_or_else(|| {
                CacheError::Config(format!(
                    "RETENTION_MAX_AGE_DAYS {} is too large",
                    self.retention_max_age_days
                ))
            })?;

        let mut worker = WorkerConfig::new(origin, self.cache_version.clone());
        worker.static_prefix = self.static_prefix.clone();
        worker.precache = self.precache_manifest.clone();
        worker.install_policy = self.install_policy;
        worker.network_timeout = match self.network_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        worker.retention_interval = Duration::from_secs(self.retention_sweep_interval);
        worker.retention_max_age = Duration::from_secs(retention_max_age);
        Ok(worker)
    }

    /// Interval of the application cache expiry sweeps. Zero is rejected.
    pub fn app_cache_cleanup_interval(&self) -> Result<Duration> {
        match self.app_cache_cleanup_interval_ms {
            0 => Err(CacheError::Config(
                "APP_CACHE_CLEANUP_INTERVAL_MS must be at least 1".to_string(),
            )),
            ms => Ok(Duration::from_millis(ms)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            origin_url: "http://127.0.0.1:8080".to_string(),
            cache_version: "v1".to_string(),
            cache_dir: Some(PathBuf::from("./site-cache")),
            static_prefix: "/static/".to_string(),
            precache_manifest: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            install_policy: InstallPolicy::BestEffort,
            network_timeout: 10,
            retention_sweep_interval: SECONDS_PER_DAY,
            retention_max_age_days: 30,
            api_cache_max_entries: 50,
            api_cache_ttl_ms: 5 * 60 * 1000,
            image_cache_max_entries: 30,
            image_cache_ttl_ms: 24 * 60 * 60 * 1000,
            general_cache_max_entries: 100,
            general_cache_ttl_ms: 5 * 60 * 1000,
            app_cache_cleanup_interval_ms: 60_000,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_manifest(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cache_version, "v1");
        assert_eq!(config.precache_manifest.len(), 5);
        assert_eq!(config.precache_manifest[0], "/");
        assert_eq!(config.api_cache_max_entries, 50);
        assert_eq!(config.image_cache_ttl_ms, 86_400_000);
    }

    #[test]
    fn test_parse_manifest() {
        assert_eq!(
            parse_manifest(" /, /a.jpg ,,/b.mp4 "),
            vec!["/".to_string(), "/a.jpg".to_string(), "/b.mp4".to_string()]
        );
    }

    #[test]
    fn test_worker_config() {
        let config = Config {
            network_timeout: 0,
            cache_version: "2024-06".to_string(),
            ..Config::default()
        };

        let worker = config.worker_config().unwrap();
        assert_eq!(worker.version, "2024-06");
        assert_eq!(worker.network_timeout, None);
        assert_eq!(worker.retention_max_age, Duration::from_secs(30 * 86_400));
        assert_eq!(worker.origin.as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_worker_config_rejects_bad_origin() {
        let config = Config {
            origin_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.worker_config(), Err(CacheError::Config(_))));

        let config = Config {
            origin_url: "mailto:someone@example.org".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.worker_config(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_worker_config_rejects_zero_sweep_interval() {
        let config = Config {
            retention_sweep_interval: 0,
            ..Config::default()
        };
        assert!(matches!(config.worker_config(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_worker_config_rejects_overflowing_max_age() {
        let config = Config {
            retention_max_age_days: u64::MAX / 2,
            ..Config::default()
        };
        assert!(matches!(config.worker_config(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_worker_config_rejects_path_like_version() {
        let config = Config {
            cache_version: "../v2".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.worker_config(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_cleanup_interval() {
        assert_eq!(
            Config::default().app_cache_cleanup_interval().unwrap(),
            Duration::from_secs(60)
        );

        let config = Config {
            app_cache_cleanup_interval_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.app_cache_cleanup_interval(),
            Err(CacheError::Config(_))
        ));
    }
}
