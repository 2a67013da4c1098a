//! Architecture diagram cache
//!
//! Diagrams are fetched through a short-lived presigned URL and cached per
//! model in a bounded moka cache. Concurrent loads of one model share a single
//! download. Entries leaving the cache for any reason other than replacement
//! are counted as revoked.

use crate::api::ImageSource;
use crate::config::SyncConfig;
use crate::error::ApiError;
use moka::future::Cache;
use moka::notification::RemovalCause;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tm_model::ModelId;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCacheStats {
    /// Entries currently cached
    pub entry_count: u64,
    /// Downloads performed
    pub downloads: u64,
    /// Entries revoked (evicted, expired or invalidated)
    pub revoked: u64,
}

/// Diagram blobs keyed by model
#[derive(Clone)]
pub struct ImageCache {
    source: Arc<dyn ImageSource>,
    inner: Cache<ModelId, Arc<Vec<u8>>>,
    downloads: Arc<AtomicU64>,
    revoked: Arc<AtomicU64>,
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ImageCache {
    /// Cache holding at most `max_capacity` diagrams
    #[must_use]
    pub fn new(source: Arc<dyn ImageSource>, max_capacity: u64) -> Self {
        let revoked = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&revoked);
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_listener(move |model: Arc<ModelId>, _blob, cause: RemovalCause| {
                if cause == RemovalCause::Replaced {
                    return;
                }
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(model = %model, ?cause, "diagram revoked");
            })
            .build();
        Self {
            source,
            inner,
            downloads: Arc::new(AtomicU64::new(0)),
            revoked,
        }
    }

    /// Cache sized by [`SyncConfig::image_cache_capacity`]
    #[must_use]
    pub fn from_config(config: &SyncConfig, source: Arc<dyn ImageSource>) -> Self {
        Self::new(source, config.image_cache_capacity)
    }

    /// Diagram for `model`, downloading it if not cached
    ///
    /// # Errors
    /// [`ApiError`] from the URL lookup or download; failures are not cached.
    pub async fn get(&self, model: &ModelId) -> Result<Arc<Vec<u8>>, ApiError> {
        let source = Arc::clone(&self.source);
        let downloads = Arc::clone(&self.downloads);
        let load = async move {
            let url = source.presigned_url(model).await?;
            let blob = source.download(&url).await?;
            downloads.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%model, bytes = blob.len(), "diagram downloaded");
            Ok::<_, ApiError>(Arc::new(blob))
        };
        self.inner
            .try_get_with(model.clone(), load)
            .await
            .map_err(|e| (*e).clone())
    }

    /// Drop a model's diagram so the next `get` refetches it
    #[inline]
    pub async fn invalidate(&self, model: &ModelId) {
        self.inner.invalidate(model).await;
    }

    /// Whether a model's diagram is cached
    #[inline]
    #[must_use]
    pub fn contains(&self, model: &ModelId) -> bool {
        self.inner.contains_key(model)
    }

    /// Flush pending evictions and notifications
    #[inline]
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> ImageCacheStats {
        ImageCacheStats {
            entry_count: self.inner.entry_count(),
            downloads: self.downloads.load(Ordering::Relaxed),
            revoked: self.revoked.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct SlowSource {
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ImageSource for SlowSource {
        async fn presigned_url(&self, model: &ModelId) -> Result<String, ApiError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::status(404, "no diagram"));
            }
            Ok(format!("https://blobs.example.com/{model}.png"))
        }

        async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(url.as_bytes().to_vec())
        }
    }

    fn cache(capacity: u64) -> (Arc<SlowSource>, ImageCache) {
        let source = Arc::new(SlowSource::default());
        let cache = ImageCache::new(source.clone(), capacity);
        (source, cache)
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_download() {
        let (_, cache) = cache(8);
        let model = ModelId::new("tm-1");

        let (a, b) = tokio::join!(cache.get(&model), cache.get(&model));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(cache.stats().downloads, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch_and_revokes() {
        let (_, cache) = cache(8);
        let model = ModelId::new("tm-1");

        cache.get(&model).await.unwrap();
        cache.invalidate(&model).await;
        cache.run_pending_tasks().await;
        assert!(!cache.contains(&model));
        assert_eq!(cache.stats().revoked, 1);

        cache.get(&model).await.unwrap();
        assert_eq!(cache.stats().downloads, 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (source, cache) = cache(8);
        let model = ModelId::new("tm-1");
        source.fail.store(true, Ordering::SeqCst);

        let err = cache.get(&model).await.unwrap_err();
        assert!(err.is_not_found());

        source.fail.store(false, Ordering::SeqCst);
        assert!(cache.get(&model).await.is_ok());
    }

    #[tokio::test]
    async fn configured_capacity_bounds_the_cache() {
        let config = SyncConfig::default().with_image_cache_capacity(1);
        let cache = ImageCache::from_config(&config, Arc::new(SlowSource::default()));
        for i in 0..3 {
            cache.get(&ModelId::new(format!("tm-{i}"))).await.unwrap();
        }
        cache.run_pending_tasks().await;

        assert!(cache.stats().entry_count <= 1);
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let (_, cache) = cache(2);
        for i in 0..5 {
            cache.get(&ModelId::new(format!("tm-{i}"))).await.unwrap();
        }
        cache.run_pending_tasks().await;

        let stats = cache.stats();
        assert!(stats.entry_count <= 2);
        assert!(stats.revoked >= 1);
    }
}
