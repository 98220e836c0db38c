//! Bounded in-memory cache
//!
//! Fixed-capacity local cache with sliding + absolute expiration and O(1)
//! whole-cache invalidation. Pattern removal is not supported here; use
//! [`TrackedMemoryCache`](crate::TrackedMemoryCache) when prefix removal is
//! needed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::local_store::LocalStore;
use crate::provider::{ensure_key, CacheProvider, Cacheable};
use crate::{CacheError, MemoryCacheConfig};

/// Bounded, process-local cache.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct MemoryCache {
    store: Arc<LocalStore>,
}

impl MemoryCache {
    /// Creates the cache. When called inside a Tokio runtime, a background
    /// pass purges expired entries on the configured scan interval.
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            store: Arc::new(LocalStore::new(config, None)),
        }
    }

    /// Runs the store's pending housekeeping (expired-entry purge, eviction
    /// notifications) immediately instead of waiting for the next scan.
    pub async fn run_pending_tasks(&self) {
        self.store.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheProvider for MemoryCache {
    async fn set<T: Cacheable>(&self, key: &str, value: T) -> Result<(), CacheError> {
        let (sliding, absolute) = self.store.default_expirations();
        self.store.set_value(key, value, sliding, absolute).await;
        Ok(())
    }

    async fn set_with_expiration<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        sliding: Duration,
        absolute: Duration,
    ) -> Result<(), CacheError> {
        self.store.set_value(key, value, sliding, absolute).await;
        Ok(())
    }

    async fn get<T: Cacheable>(&self, key: &str) -> Result<Option<T>, CacheError> {
        Ok(self.store.get_value(key).await)
    }

    async fn get_or_compute<T, F>(&self, key: &str, factory: F) -> Result<Option<T>, CacheError>
    where
        T: Cacheable,
        F: FnOnce() -> T + Send,
    {
        if !ensure_key(key, "get_or_compute") {
            return Ok(None);
        }
        if let Some(value) = self.store.get_value::<T>(key).await {
            return Ok(Some(value));
        }
        // Concurrent misses may each run their factory; the last write wins.
        let value = factory();
        let (sliding, absolute) = self.store.default_expirations();
        self.store
            .set_value(key, value.clone(), sliding, absolute)
            .await;
        Ok(Some(value))
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key).await;
        Ok(())
    }

    async fn remove_pattern(&self, _prefix: &str) -> Result<(), CacheError> {
        Err(CacheError::Unsupported(
            "pattern removal on the in-memory cache",
        ))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.store.exists(key).await)
    }

    async fn refresh<T: Cacheable>(&self, key: &str, value: T) -> Result<(), CacheError> {
        if !ensure_key(key, "refresh") {
            return Ok(());
        }
        self.store.remove(key).await;
        self.set(key, value).await
    }

    async fn refresh_with_ttl<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if !ensure_key(key, "refresh") {
            return Ok(());
        }
        self.store.remove(key).await;
        let sliding = self.store.config().sliding_ttl;
        self.store.set_value(key, value, sliding, ttl).await;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.store.flush();
        Ok(())
    }

    async fn count(&self) -> Result<u64, CacheError> {
        Ok(self.store.entry_count())
    }
}
