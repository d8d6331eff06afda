//! API Handlers
//!
//! The interception fallback plus the worker maintenance endpoints.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;
use url::Url;

use crate::context::{AppCacheStats, AppContext};
use crate::error::{CacheError, Result};
use crate::models::{ControlResponse, HealthResponse, UpdateRequest};
use crate::worker::{
    ControlMessage, Destination, FetchRequest, RequestMode, UpdateReport, WorkerHandle,
    WorkerStatus,
};

/// Largest request body forwarded upstream
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Mailbox of the worker task
    pub worker: WorkerHandle,
    /// Application caches
    pub app: Arc<AppContext>,
    /// Origin intercepted paths are resolved against
    pub origin: Url,
}

impl AppState {
    pub fn new(worker: WorkerHandle, app: Arc<AppContext>, origin: Url) -> Self {
        Self {
            worker,
            app,
            origin,
        }
    }
}

/// Fallback handler: every request not aimed at `/__worker/*` goes through
/// the worker.
pub async fn intercept_handler(State(state): State<AppState>, request: Request) -> Response {
    match to_fetch_request(&state.origin, request).await {
        Ok(fetch) => {
            debug!("Intercepted {} {} ({:?})", fetch.method, fetch.url, fetch.destination);
            state.worker.fetch(fetch).await.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Handler for POST /__worker/control
pub async fn control_handler(
    State(state): State<AppState>,
    Json(message): Json<ControlMessage>,
) -> Result<(StatusCode, Json<ControlResponse>)> {
    state.worker.post_message(message).await?;
    Ok((StatusCode::ACCEPTED, Json(ControlResponse::queued(message))))
}

/// Handler for POST /__worker/update
///
/// Answers once the new version is installed and active.
pub async fn update_handler(
    State(state): State<AppState>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UpdateReport>> {
    if let Some(error) = request.validate() {
        return Err(CacheError::InvalidRequest(error));
    }
    Ok(Json(state.worker.update(request.version.trim()).await?))
}

/// Handler for GET /__worker/status
pub async fn status_handler(State(state): State<AppState>) -> Result<Json<WorkerStatus>> {
    Ok(Json(state.worker.status().await?))
}

/// Handler for GET /__worker/app-cache
pub async fn app_cache_handler(State(state): State<AppState>) -> Json<AppCacheStats> {
    Json(state.app.stats().await)
}

/// Handler for GET /__worker/health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

// == Request Conversion ==
async fn to_fetch_request(origin: &Url, request: Request) -> Result<FetchRequest> {
    let (parts, body) = request.into_parts();

    let url = resolve_on_origin(origin, &parts.uri)?;

    let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| CacheError::InvalidRequest(format!("unreadable body: {}", e)))?;

    let destination = parts
        .headers
        .get("sec-fetch-dest")
        .and_then(|v| v.to_str().ok())
        .and_then(Destination::from_fetch_dest)
        .unwrap_or_else(|| Destination::from_path(url.path()));

    Ok(FetchRequest {
        mode: request_mode(&parts.headers),
        method: parts.method,
        url,
        destination,
        headers: parts.headers,
        body,
    })
}

/// Puts the request path and query on the proxied origin. The authority of
/// an absolute-form URI is ignored, and a path that would re-parse as
/// another host never leaves the origin.
fn resolve_on_origin(origin: &Url, uri: &Uri) -> Result<Url> {
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url.set_fragment(None);

    if url.origin() != origin.origin() {
        return Err(CacheError::InvalidRequest(format!(
            "{} does not belong to {}",
            uri,
            origin.origin().ascii_serialization()
        )));
    }
    Ok(url)
}

/// `Sec-Fetch-Mode: navigate`, or an HTML-accepting request from a client
/// that does not send fetch metadata.
fn request_mode(headers: &HeaderMap) -> RequestMode {
    let navigate = match headers.get("sec-fetch-mode") {
        Some(mode) => mode.as_bytes() == b"navigate",
        None => headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|accept| accept.contains("text/html"))
            .unwrap_or(false),
    };

    if navigate {
        RequestMode::Navigate
    } else {
        RequestMode::Subresource
    }
}
