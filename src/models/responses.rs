//! Response DTOs for the proxy's maintenance endpoints.

use serde::Serialize;

use crate::worker::ControlMessage;

/// Response body for `POST /__worker/control`
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    /// The message that was queued
    pub accepted: ControlMessage,
    pub message: String,
}

impl ControlResponse {
    pub fn queued(accepted: ControlMessage) -> Self {
        Self {
            accepted,
            message: "Control message delivered to the worker".to_string(),
        }
    }
}

/// Response body for the health endpoint (`GET /__worker/health`)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
