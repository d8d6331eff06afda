//! Image cache
//!
//! Preloads images out of band and keeps the decoded result around for a day.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{shared, BoundedCache, SharedCache, StatsSnapshot};
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_cleanup_task, CleanupHandle};

pub const DEFAULT_IMAGE_CACHE_SIZE: usize = 30;
pub const DEFAULT_IMAGE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// == Decoded Image ==
/// A successfully decoded image.
#[derive(Debug)]
pub struct DecodedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub pixels: image::DynamicImage,
}

/// Cache value for one preloaded image.
#[derive(Debug, Clone, Serialize)]
pub struct CachedImage {
    #[serde(skip)]
    pub element: Arc<DecodedImage>,
    pub loaded: bool,
    /// Unix milliseconds at which decoding finished
    pub timestamp: u64,
}

// == Image Loader ==
/// Fetches and decodes an image.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<DecodedImage>;
}

/// Downloads with `reqwest` and decodes on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct HttpImageLoader {
    client: reqwest::Client,
}

impl HttpImageLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, url: &str) -> Result<DecodedImage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CacheError::ImageDecode(format!("{url}: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::ImageDecode(format!("{url}: {e}")))?;

        let url = url.to_string();
        tokio::task::spawn_blocking(move || decode(url, &bytes))
            .await
            .map_err(|e| CacheError::Internal(e.to_string()))?
    }
}

/// Decodes raw bytes in any enabled format.
pub fn decode(url: String, bytes: &[u8]) -> Result<DecodedImage> {
    let pixels = image::load_from_memory(bytes)
        .map_err(|e| CacheError::ImageDecode(format!("{url}: {e}")))?;
    Ok(DecodedImage {
        width: pixels.width(),
        height: pixels.height(),
        url,
        pixels,
    })
}

// == Image Cache ==
#[derive(Clone)]
pub struct ImageCache {
    inner: SharedCache<CachedImage>,
    loader: Arc<dyn ImageLoader>,
}

impl ImageCache {
    pub fn new(max_size: usize, default_ttl: Duration, loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            inner: shared(BoundedCache::new(max_size, default_ttl)),
            loader,
        }
    }

    pub fn with_loader(loader: Arc<dyn ImageLoader>) -> Self {
        Self::new(DEFAULT_IMAGE_CACHE_SIZE, DEFAULT_IMAGE_CACHE_TTL, loader)
    }

    // == Preload ==
    /// Returns the cached image for `url`, loading and caching it on a miss.
    ///
    /// A failed load is returned to the caller and leaves no trace in the
    /// cache, so the next call retries.
    pub async fn preload_image(&self, url: &str) -> Result<Arc<DecodedImage>> {
        if let Some(image) = self.get_image(url).await {
            return Ok(image);
        }

        let decoded = match self.loader.load(url).await {
            Ok(decoded) => Arc::new(decoded),
            Err(e) => {
                warn!("Image preload failed for {}: {}", url, e);
                return Err(e);
            }
        };

        let cached = CachedImage {
            element: decoded.clone(),
            loaded: true,
            timestamp: current_timestamp_ms(),
        };
        self.inner.write().await.set(url, cached, None)?;
        debug!("Preloaded image {} ({}x{})", url, decoded.width, decoded.height);

        Ok(decoded)
    }

    /// Returns the cached image for `url`, if live.
    pub async fn get_image(&self, url: &str) -> Option<Arc<DecodedImage>> {
        self.inner
            .write()
            .await
            .get(url)
            .ok()
            .map(|cached| cached.element)
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.inner.read().await.stats()
    }

    /// Starts the periodic expiry sweep for this cache.
    pub fn start_cleanup(&self, interval: Duration) -> CleanupHandle {
        spawn_cleanup_task(self.inner.clone(), interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Serves canned bytes per URL; unknown URLs decode as garbage.
    #[derive(Default)]
    struct FakeLoader {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl FakeLoader {
        fn serve(&self, url: &str, body: Vec<u8>) {
            self.bodies.lock().unwrap().insert(url.to_string(), body);
        }
    }

    #[async_trait]
    impl ImageLoader for FakeLoader {
        async fn load(&self, url: &str) -> Result<DecodedImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self
                .bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or_else(|| b"not an image".to_vec());
            decode(url.to_string(), &body)
        }
    }

    #[tokio::test]
    async fn test_preload_caches_decoded_image() {
        let loader = Arc::new(FakeLoader::default());
        loader.serve("/community.jpg", png_bytes(4, 3));
        let cache = ImageCache::with_loader(loader.clone());

        let first = cache.preload_image("/community.jpg").await.unwrap();
        let second = cache.preload_image("/community.jpg").await.unwrap();

        assert_eq!((first.width, first.height), (4, 3));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(cache.get_image("/community.jpg").await.is_some());
    }

    #[tokio::test]
    async fn test_decode_failure_is_not_cached() {
        let loader = Arc::new(FakeLoader::default());
        let cache = ImageCache::with_loader(loader.clone());

        let result = cache.preload_image("/broken.jpg").await;
        assert!(matches!(result, Err(CacheError::ImageDecode(_))));
        assert!(cache.get_image("/broken.jpg").await.is_none());

        // Once the asset is fixed the retry succeeds.
        loader.serve("/broken.jpg", png_bytes(1, 1));
        assert!(cache.preload_image("/broken.jpg").await.is_ok());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_defaults() {
        let cache = ImageCache::with_loader(Arc::new(FakeLoader::default()));
        let stats = cache.stats().await;
        assert_eq!(stats.max_size, DEFAULT_IMAGE_CACHE_SIZE);
    }
}
