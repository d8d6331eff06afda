//! Partition naming and per-request routing.

use axum::http::Method;
use serde::Serialize;

use crate::error::{CacheError, Result};
use crate::worker::FetchRequest;

/// Longest accepted deployment version
pub const MAX_VERSION_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionRole {
    /// Precached manifest and static-prefixed assets
    Static,
    /// Everything cached at runtime
    Dynamic,
}

// == Partition Names ==
/// The current partition name for each role, derived from the deployed
/// version. Any other partition is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionNames {
    pub static_name: String,
    pub dynamic_name: String,
}

impl PartitionNames {
    pub fn for_version(version: &str) -> Self {
        Self {
            static_name: format!("static-{}", version),
            dynamic_name: format!("dynamic-{}", version),
        }
    }

    /// Like [`for_version`](Self::for_version), but rejects versions that
    /// cannot name a partition directory: empty, too long, or containing
    /// anything but ASCII letters, digits, `.`, `_` and `-`.
    pub fn try_for_version(version: &str) -> Result<Self> {
        let valid_chars = version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if version.is_empty()
            || version.len() > MAX_VERSION_LENGTH
            || !valid_chars
            || version.chars().all(|c| c == '.')
        {
            return Err(CacheError::InvalidRequest(format!(
                "invalid cache version '{}'",
                version
            )));
        }
        Ok(Self::for_version(version))
    }

    pub fn name(&self, role: PartitionRole) -> &str {
        match role {
            PartitionRole::Static => &self.static_name,
            PartitionRole::Dynamic => &self.dynamic_name,
        }
    }

    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_name || name == self.dynamic_name
    }
}

// == Strategy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted: straight to the network
    Passthrough,
    /// Serve from cache, fetch and store into the given partition on a miss
    CacheFirst(PartitionRole),
    /// Fetch, store into the dynamic partition, fall back to cache offline
    NetworkFirst,
}

/// Picks the strategy for one request.
///
/// Only GET is intercepted. The static prefix takes precedence over the
/// media check, so an image under the prefix lands in the static partition.
pub fn classify(request: &FetchRequest, static_prefix: &str) -> Strategy {
    if request.method != Method::GET {
        return Strategy::Passthrough;
    }

    if !static_prefix.is_empty() && request.url.path().starts_with(static_prefix) {
        Strategy::CacheFirst(PartitionRole::Static)
    } else if request.destination.is_media() {
        Strategy::CacheFirst(PartitionRole::Dynamic)
    } else {
        Strategy::NetworkFirst
    }
}
