//! Site Cache - offline-first caching proxy
//!
//! Runs the network interceptor in front of the site's origin.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use site_cache::api::{create_router, AppState};
use site_cache::cache::HttpImageLoader;
use site_cache::worker::{CacheStorage, HttpFetcher};
use site_cache::{
    spawn_retention_task, spawn_worker, AppContext, CleanupHandle, Config, ServiceWorker,
};

/// Main entry point for the caching proxy.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the cache partitions, spawn the worker task, then install and
///    activate it
/// 4. Start the retention sweep and the application caches
/// 5. Serve the proxy router on the configured port
/// 6. Stop background work on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "site_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Site Cache proxy");

    let config = Config::from_env();
    let worker_config = config.worker_config()?;
    info!(
        "Configuration loaded: origin={}, version={}, port={}, precache={} assets",
        worker_config.origin,
        worker_config.version,
        config.server_port,
        worker_config.precache.len()
    );

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let storage = match &config.cache_dir {
        Some(dir) => CacheStorage::persistent(dir)
            .await
            .with_context(|| format!("failed to open cache directory {}", dir.display()))?,
        None => {
            info!("CACHE_DIR is empty, keeping partitions in memory only");
            CacheStorage::new()
        }
    };
    let origin = worker_config.origin.clone();
    let retention_interval = worker_config.retention_interval;
    let retention_max_age = worker_config.retention_max_age;

    let worker = Arc::new(ServiceWorker::new(
        worker_config,
        storage.clone(),
        Arc::new(HttpFetcher::new(client.clone())),
    ));
    let (handle, worker_task) = spawn_worker(worker);

    match handle.register().await {
        Ok(report) if report.failed.is_empty() => {
            info!("Worker registered, {} assets precached", report.cached.len());
        }
        Ok(report) => {
            warn!(
                "Worker registered with {} precache failures: {}",
                report.failed.len(),
                report.failed.join(", ")
            );
        }
        Err(e) => return Err(e).context("worker registration failed"),
    }

    let retention = spawn_retention_task(storage, retention_interval, retention_max_age);

    let app = Arc::new(
        AppContext::start(&config, Arc::new(HttpImageLoader::new(client)))
            .context("failed to start application caches")?,
    );

    let router = create_router(AppState::new(handle, app.clone(), origin));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Proxy listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(retention))
        .await
        .context("server error")?;

    app.shutdown().await;
    worker_task.abort();
    info!("Proxy shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the retention
/// sweep.
async fn shutdown_signal(retention: CleanupHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    retention.stop();
    warn!("Retention sweep stopped");
}
