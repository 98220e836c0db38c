//! In-memory cache with prefix-pattern removal
//!
//! The underlying store offers no key enumeration, so this cache keeps a side
//! index of live keys. The index is eventually consistent with the store: it
//! is reconciled on the store's own eviction-notification path and never
//! blocks readers or writers. Brief divergence self-corrects on the next
//! eviction or removal pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::notification::RemovalCause;

use crate::local_store::{CacheEntry, EvictionListener, LocalStore};
use crate::provider::{ensure_key, CacheProvider, Cacheable};
use crate::{CacheError, MemoryCacheConfig};

/// Per-key index state. Absent keys are simply not in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyState {
    Alive,
    PendingRemoval,
}

type KeyIndex = DashMap<String, KeyState>;

/// Bounded, process-local cache that also supports `remove_pattern`.
///
/// Cheap to clone; clones share the same store and key index.
#[derive(Clone)]
pub struct TrackedMemoryCache {
    store: Arc<LocalStore>,
    index: Arc<KeyIndex>,
}

impl TrackedMemoryCache {
    /// Creates the cache. When called inside a Tokio runtime, a background
    /// pass purges expired entries on the configured scan interval.
    pub fn new(config: MemoryCacheConfig) -> Self {
        let index: Arc<KeyIndex> = Arc::new(DashMap::new());
        let listener: EvictionListener = {
            let index = Arc::clone(&index);
            Box::new(
                move |key: Arc<String>, _entry: CacheEntry, cause: RemovalCause| {
                    if cause == RemovalCause::Replaced {
                        return;
                    }
                    reconcile(&index, key.as_str());
                },
            )
        };
        Self {
            store: Arc::new(LocalStore::new(config, Some(listener))),
            index,
        }
    }

    /// Runs the store's pending housekeeping (expired-entry purge, eviction
    /// notifications) immediately instead of waiting for the next scan.
    pub async fn run_pending_tasks(&self) {
        self.store.run_pending_tasks().await;
    }

    async fn store_and_index<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        sliding: Duration,
        absolute: Duration,
    ) {
        if self.store.set_value(key, value, sliding, absolute).await {
            self.index.insert(key.to_owned(), KeyState::Alive);
        }
    }
}

/// Index reconciliation, run on the store's eviction-notification path.
///
/// Keys flagged on an earlier pass are dropped first; the newly notified key
/// then moves alive -> pending-removal, or is dropped if a concurrent pass
/// already flagged it.
fn reconcile(index: &KeyIndex, evicted: &str) {
    index.retain(|_, state| *state == KeyState::Alive);
    match index.entry(evicted.to_owned()) {
        Entry::Occupied(mut slot) => match slot.get() {
            KeyState::Alive => {
                slot.insert(KeyState::PendingRemoval);
            }
            KeyState::PendingRemoval => {
                slot.remove();
            }
        },
        Entry::Vacant(_) => {}
    }
}

#[async_trait]
impl CacheProvider for TrackedMemoryCache {
    async fn set<T: Cacheable>(&self, key: &str, value: T) -> Result<(), CacheError> {
        let (sliding, absolute) = self.store.default_expirations();
        self.store_and_index(key, value, sliding, absolute).await;
        Ok(())
    }

    async fn set_with_expiration<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        sliding: Duration,
        absolute: Duration,
    ) -> Result<(), CacheError> {
        self.store_and_index(key, value, sliding, absolute).await;
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
        self.store_and_index(key, value.clone(), sliding, absolute)
            .await;
        Ok(Some(value))
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        // the eviction notification transitions the index entry
        self.store.remove(key).await;
        Ok(())
    }

    async fn remove_pattern(&self, prefix: &str) -> Result<(), CacheError> {
        if !ensure_key(prefix, "remove_pattern") {
            return Ok(());
        }
        let matches: Vec<String> = self
            .index
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        for key in matches {
            self.remove(&key).await?;
        }
        Ok(())
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
        self.store_and_index(key, value, sliding, ttl).await;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        // the index is left alone; it self-corrects as the dead entries are
        // purged and their eviction notifications arrive
        self.store.flush();
        Ok(())
    }

    async fn count(&self) -> Result<u64, CacheError> {
        Ok(self.store.entry_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_removal_leaves_other_keys_intact() {
        let cache = TrackedMemoryCache::new(MemoryCacheConfig::default());
        cache.set("foo-1", 1u32).await.unwrap();
        cache.set("foo-2", 2u32).await.unwrap();
        cache.set("bar-1", 3u32).await.unwrap();

        cache.remove_pattern("foo-").await.unwrap();

        assert_eq!(cache.get::<u32>("foo-1").await.unwrap(), None);
        assert_eq!(cache.get::<u32>("foo-2").await.unwrap(), None);
        assert_eq!(cache.get::<u32>("bar-1").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn set_marks_the_key_alive() {
        let cache = TrackedMemoryCache::new(MemoryCacheConfig::default());
        cache.set("k", 1u32).await.unwrap();

        assert_eq!(cache.index.get("k").map(|s| *s), Some(KeyState::Alive));
    }

    #[tokio::test]
    async fn eviction_notifications_reconcile_the_index() {
        let cache = TrackedMemoryCache::new(MemoryCacheConfig::default());

        cache.set("a", 1u32).await.unwrap();
        cache.remove("a").await.unwrap();
        cache.run_pending_tasks().await;
        // first pass: nothing was pending yet, "a" gets flagged
        assert_eq!(
            cache.index.get("a").map(|s| *s),
            Some(KeyState::PendingRemoval)
        );

        cache.set("b", 2u32).await.unwrap();
        cache.remove("b").await.unwrap();
        cache.run_pending_tasks().await;
        // second pass: the sweep drops "a", then "b" gets flagged
        assert!(cache.index.get("a").is_none());
        assert_eq!(
            cache.index.get("b").map(|s| *s),
            Some(KeyState::PendingRemoval)
        );
    }

    #[tokio::test]
    async fn replacement_does_not_touch_the_index() {
        let cache = TrackedMemoryCache::new(MemoryCacheConfig::default());
        cache.set("k", 1u32).await.unwrap();
        cache.set("k", 2u32).await.unwrap();
        cache.run_pending_tasks().await;

        assert_eq!(cache.index.get("k").map(|s| *s), Some(KeyState::Alive));
        assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn empty_prefix_no_ops() {
        let cache = TrackedMemoryCache::new(MemoryCacheConfig::default());
        cache.set("k", 1u32).await.unwrap();

        cache.remove_pattern("").await.unwrap();
        assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn flush_hides_entries_and_reset_is_clean() {
        let cache = TrackedMemoryCache::new(MemoryCacheConfig::default());
        cache.set("k", 1u32).await.unwrap();

        cache.flush().await.unwrap();
        assert_eq!(cache.get::<u32>("k").await.unwrap(), None);

        // the store is authoritative after a re-set; the index catches up on
        // its own eviction passes
        cache.set("k", 2u32).await.unwrap();
        assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(2));
    }
}
