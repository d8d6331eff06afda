//! Integration Tests for the proxy endpoints
//!
//! Tests full request/response cycle through the router, with the worker
//! talking to a scripted network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use site_cache::api::{create_router, AppState};
use site_cache::cache::HttpImageLoader;
use site_cache::error::{CacheError, Result};
use site_cache::worker::{
    spawn_worker, CacheStorage, FetchRequest, FetchResponse, Fetcher, ServiceWorker,
    WorkerConfig, OFFLINE_MESSAGE,
};
use site_cache::{AppContext, Config};
use tower::ServiceExt;
use url::Url;

const ORIGIN: &str = "http://site.test";

// == Scripted Network ==

#[derive(Default)]
struct Network {
    routes: Mutex<HashMap<String, &'static str>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Url>>,
}

impl Network {
    fn serve(&self, path: &str, body: &'static str) {
        let url = Url::parse(ORIGIN).unwrap().join(path).unwrap();
        self.routes.lock().unwrap().insert(url.to_string(), body);
    }
}

#[async_trait]
impl Fetcher for Network {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.url.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Network("offline".to_string()));
        }
        let body = self.routes.lock().unwrap().get(request.url.as_str()).copied();
        Ok(match body {
            Some(body) => FetchResponse::new(StatusCode::OK, body),
            None => FetchResponse::new(StatusCode::NOT_FOUND, "no such page"),
        })
    }
}

// == Helper Functions ==

async fn create_test_app(network: Arc<Network>) -> (Router, Arc<AppContext>) {
    let origin = Url::parse(ORIGIN).unwrap();
    let mut config = WorkerConfig::new(origin.clone(), "v1");
    config.precache = vec!["/".to_string()];

    let worker = Arc::new(ServiceWorker::new(config, CacheStorage::new(), network));
    let (handle, _task) = spawn_worker(worker);
    handle.register().await.unwrap();

    let app = Arc::new(AppContext::new(
        &Config::default(),
        Arc::new(HttpImageLoader::new(reqwest::Client::new())),
    ));
    let router = create_router(AppState::new(handle, app.clone(), origin));
    (router, app)
}

fn site_network() -> Arc<Network> {
    let network = Arc::new(Network::default());
    network.serve("/", "<html>shell</html>");
    network.serve("/community.jpg", "jpeg");
    network.serve("/events", "<html>events</html>");
    network
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app(site_network()).await;

    let response = app.oneshot(get("/__worker/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}

// == Status Endpoint Tests ==

#[tokio::test]
async fn test_status_reports_active_worker() {
    let (app, _) = create_test_app(site_network()).await;

    let response = app.oneshot(get("/__worker/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["state"], "activated");
    assert_eq!(json["static_partition"], "static-v1");
    assert_eq!(json["dynamic_partition"], "dynamic-v1");
    assert_eq!(json["partitions"][0]["name"], "static-v1");
    assert_eq!(json["partitions"][0]["entries"], 1);
}

// == Control Endpoint Tests ==

#[tokio::test]
async fn test_clear_cache_control_message() {
    let (app, _) = create_test_app(site_network()).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/__worker/control")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"type":"CLEAR_CACHE"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["accepted"]["type"], "CLEAR_CACHE");

    let response = app.oneshot(get("/__worker/status")).await.unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["partitions"], json!([]));
}

#[tokio::test]
async fn test_unknown_control_message_rejected() {
    let (app, _) = create_test_app(site_network()).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/__worker/control")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"type":"SELF_DESTRUCT"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

// == Update Endpoint Tests ==

#[tokio::test]
async fn test_update_endpoint_swaps_versions() {
    let network = site_network();
    let (app, _) = create_test_app(network.clone()).await;
    app.clone().oneshot(get("/community.jpg")).await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/__worker/update")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"version":"v2"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["version"], "v2");
    assert_eq!(json["install"]["cached"], json!(["/"]));
    assert_eq!(json["deleted"], json!(["dynamic-v1", "static-v1"]));

    let response = app.oneshot(get("/__worker/status")).await.unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["version"], "v2");
    assert_eq!(json["static_partition"], "static-v2");
    assert_eq!(json["partitions"], json!([{"name": "static-v2", "entries": 1}]));
}

#[tokio::test]
async fn test_update_endpoint_rejects_bad_versions() {
    let (app, _) = create_test_app(site_network()).await;

    for (body, expected) in [
        (r#"{"version":"v1"}"#, StatusCode::CONFLICT),
        (r#"{"version":"../../tmp"}"#, StatusCode::BAD_REQUEST),
        (r#"{"version":" "}"#, StatusCode::BAD_REQUEST),
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/__worker/update")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "{}", body);
    }
}

// == App Cache Endpoint Tests ==

#[tokio::test]
async fn test_app_cache_stats() {
    let (app, context) = create_test_app(site_network()).await;
    context
        .api_cache()
        .cache_api_response("/api/events", None, json!({"events": []}), None)
        .await
        .unwrap();
    context.api_cache().get_api_response("/api/events", None).await;

    let response = app.oneshot(get("/__worker/app-cache")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["api"]["size"], 1);
    assert_eq!(json["api"]["max_size"], 50);
    assert_eq!(json["api"]["hits"], 1);
    assert_eq!(json["images"]["max_size"], 30);
    assert_eq!(json["general"]["size"], 0);
}

// == Interception Tests ==

#[tokio::test]
async fn test_image_served_from_cache_second_time() {
    let network = site_network();
    let (app, _) = create_test_app(network.clone()).await;
    let calls_after_install = network.calls.load(Ordering::SeqCst);

    for _ in 0..2 {
        let response = app.clone().oneshot(get("/community.jpg")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_to_string(response.into_body()).await, "jpeg");
    }

    assert_eq!(network.calls.load(Ordering::SeqCst), calls_after_install + 1);
}

#[tokio::test]
async fn test_offline_navigation_gets_app_shell() {
    let network = site_network();
    let (app, _) = create_test_app(network.clone()).await;
    network.offline.store(true, Ordering::SeqCst);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/visit-us")
                .header("sec-fetch-mode", "navigate")
                .header("sec-fetch-dest", "document")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_string(response.into_body()).await, "<html>shell</html>");
}

#[tokio::test]
async fn test_html_accept_counts_as_navigation() {
    let network = site_network();
    let (app, _) = create_test_app(network.clone()).await;
    network.offline.store(true, Ordering::SeqCst);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/about")
                .header("accept", "text/html,application/xhtml+xml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(body_to_string(response.into_body()).await, "<html>shell</html>");
}

#[tokio::test]
async fn test_offline_subresource_is_404() {
    let network = site_network();
    let (app, _) = create_test_app(network.clone()).await;
    network.offline.store(true, Ordering::SeqCst);

    let response = app.oneshot(get("/teaching.jpg")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_to_string(response.into_body()).await, OFFLINE_MESSAGE);
}

#[tokio::test]
async fn test_online_page_comes_from_network() {
    let network = site_network();
    let (app, _) = create_test_app(network.clone()).await;

    let response = app.oneshot(get("/events")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_string(response.into_body()).await, "<html>events</html>");
}

#[tokio::test]
async fn test_scheme_relative_path_stays_on_origin() {
    let network = site_network();
    let (app, _) = create_test_app(network.clone()).await;
    network.seen.lock().unwrap().clear();

    let response = app.oneshot(get("//evil.example/steal")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let seen = network.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].host_str(), Some("site.test"));
    assert_eq!(seen[0].path(), "//evil.example/steal");
}
