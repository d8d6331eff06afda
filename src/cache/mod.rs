//! Cache Module
//!
//! In-memory application cache with TTL expiration and LRU eviction, plus the
//! API-response and image specializations built on it.

pub mod api_cache;
mod entry;
pub mod image_cache;
mod lru;
mod memo;
mod stats;
mod store;


// Re-export public types
pub use api_cache::{api_key, ApiCache, ApiCacheValue};
pub use entry::{current_timestamp_ms, CacheEntry};
pub use image_cache::{CachedImage, DecodedImage, HttpImageLoader, ImageCache, ImageLoader};
pub use lru::LruTracker;
pub use memo::{memoize, set_many, shared, warm, Debouncer, SharedCache};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::BoundedCache;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 2048;

/// Default TTL of the general-purpose cache
pub const DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Default capacity of the general-purpose cache
pub const DEFAULT_MAX_SIZE: usize = 100;
