//! Error types for the caching layers
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the worker, the application caches and the proxy.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key has expired
    #[error("Key expired: {0}")]
    Expired(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Key rejected before insertion
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Cache is full and eviction failed
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// Upstream fetch failed (offline, DNS, connection reset...)
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream fetch did not finish in time
    #[error("Network timeout: {0}")]
    Timeout(String),

    /// Image could not be downloaded or decoded
    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    /// Strict install policy and a manifest asset could not be cached
    #[error("Install failed: {0}")]
    InstallFailed(String),

    /// Lifecycle transition requested from the wrong state
    #[error("Invalid worker state: {0}")]
    InvalidState(String),

    /// The worker task is gone
    #[error("Worker unavailable")]
    WorkerUnavailable,

    /// Partition files could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::Expired(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) | CacheError::InvalidKey(_) | CacheError::Config(_) => {
                StatusCode::BAD_REQUEST
            }
            CacheError::InvalidState(_) => StatusCode::CONFLICT,
            CacheError::CacheFull(_) | CacheError::WorkerUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::Network(_) | CacheError::ImageDecode(_) => StatusCode::BAD_GATEWAY,
            CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::InstallFailed(_) | CacheError::Storage(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CacheError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (CacheError::Expired("k".into()), StatusCode::NOT_FOUND),
            (CacheError::InvalidKey("k".into()), StatusCode::BAD_REQUEST),
            (CacheError::InvalidState("x".into()), StatusCode::CONFLICT),
            (CacheError::WorkerUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (CacheError::Timeout("u".into()), StatusCode::GATEWAY_TIMEOUT),
            (CacheError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_error_body_is_json() {
        let response = CacheError::Network("connection refused".into()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }
}
