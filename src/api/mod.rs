//! API Module
//!
//! HTTP surface of the caching proxy.
//!
//! # Endpoints
//! - `POST /__worker/control` - Post a control message to the worker
//! - `GET /__worker/status` - Worker state and partition sizes
//! - `GET /__worker/app-cache` - Application cache statistics
//! - `GET /__worker/health` - Health check endpoint
//! - fallback - every other request is intercepted by the worker

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
