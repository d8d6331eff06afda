//! API Routes
//!
//! Configures the Axum router: maintenance endpoints under `/__worker/` and
//! a fallback that sends everything else through the worker.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    app_cache_handler, control_handler, health_handler, intercept_handler, status_handler,
    update_handler, AppState,
};

/// Creates the proxy router.
///
/// # Endpoints
/// - `POST /__worker/control` - Post a control message (`{"type":"CLEAR_CACHE"}`)
/// - `POST /__worker/update` - Install and activate a new version (`{"version":"v2"}`)
/// - `GET /__worker/status` - Worker state and partition sizes
/// - `GET /__worker/app-cache` - Application cache statistics
/// - `GET /__worker/health` - Health check endpoint
/// - anything else - intercepted by the worker
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/__worker/control", post(control_handler))
        .route("/__worker/update", post(update_handler))
        .route("/__worker/status", get(status_handler))
        .route("/__worker/app-cache", get(app_cache_handler))
        .route("/__worker/health", get(health_handler))
        .fallback(intercept_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
