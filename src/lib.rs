//! Site Cache - offline-first caching for a multi-page site
//!
//! Two independent layers:
//! - a network interceptor ([`worker`]) that serves requests from versioned
//!   cache partitions or the network, hosted here as a local caching proxy
//! - an in-memory application cache ([`cache`]) with TTL expiration and LRU
//!   eviction, specialized for API responses and preloaded images

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod tasks;
pub mod worker;

pub use api::AppState;
pub use config::Config;
pub use context::AppContext;
pub use tasks::{spawn_cleanup_task, spawn_retention_task, CleanupHandle};
pub use worker::{spawn_worker, ServiceWorker, WorkerHandle};
