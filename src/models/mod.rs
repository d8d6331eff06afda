//! Request and response models for the proxy's maintenance endpoints
//!
//! Intercepted traffic is returned as-is; only the `/__worker/*` endpoints
//! produce JSON bodies of their own.

pub mod requests;
pub mod responses;

pub use requests::UpdateRequest;
pub use responses::{ControlResponse, HealthResponse};
