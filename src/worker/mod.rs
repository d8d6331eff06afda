//! Worker Module
//!
//! Network interceptor that answers requests from versioned cache partitions
//! or the network.
//!
//! # Routing
//! - non-GET: passed through untouched
//! - static-prefixed paths: cache-first, stored in the static partition
//! - images and video: cache-first, stored in the dynamic partition
//! - everything else: network-first, falling back to cache and then to the
//!   cached root document for navigations
//!
//! Only complete `200` responses to requests without credentials are stored.

mod actor;
mod fetcher;
mod persist;
mod request;
mod service;
mod storage;
mod strategy;

pub use actor::{spawn_worker, ControlMessage, WorkerHandle, WorkerMessage, MAILBOX_CAPACITY};
pub use fetcher::{Fetcher, HttpFetcher};
pub use request::{
    cache_key, strip_hop_by_hop, Destination, FetchRequest, FetchResponse, RequestMode,
    OFFLINE_MESSAGE,
};
pub use service::{
    InstallPolicy, InstallReport, PartitionSummary, ServiceWorker, UpdateReport, WorkerConfig,
    WorkerState, WorkerStatus, DEFAULT_PRECACHE, DEFAULT_RETENTION_INTERVAL,
    DEFAULT_RETENTION_MAX_AGE,
};
pub use storage::CacheStorage;
pub use strategy::{classify, PartitionNames, PartitionRole, Strategy};
