//! Shared core of the in-memory caches
//!
//! Wraps a bounded moka store with per-entry sliding + absolute expiration,
//! type-checked retrieval and whole-cache invalidation through a swappable
//! generation token. The bounded and tracked cache fronts both build on this.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::provider::ensure_key;
use crate::MemoryCacheConfig;

/// Generation token swapped wholesale on flush.
///
/// Entries hold the token that was current when they were inserted; pointer
/// inequality against the cache's current token marks them dead even before
/// they are physically purged.
pub(crate) struct FlushToken;

#[derive(Clone)]
pub(crate) struct CacheEntry {
    pub value: Arc<dyn Any + Send + Sync>,
    pub token: Arc<FlushToken>,
    pub inserted_at: Instant,
    pub sliding: Duration,
    pub absolute: Duration,
}

/// Per-entry expiration: the deadline is the earlier of the sliding window
/// (reset on every read) and what remains of the absolute window.
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.sliding.min(entry.absolute))
    }

    fn expire_after_read(
        &self,
        _key: &String,
        entry: &CacheEntry,
        read_at: Instant,
        _duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        let age = read_at.saturating_duration_since(entry.inserted_at);
        let absolute_left = entry.absolute.saturating_sub(age);
        Some(entry.sliding.min(absolute_left))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.sliding.min(entry.absolute))
    }
}

pub(crate) type EvictionListener =
    Box<dyn Fn(Arc<String>, CacheEntry, RemovalCause) + Send + Sync + 'static>;

pub(crate) struct LocalStore {
    store: Cache<String, CacheEntry>,
    token: ArcSwap<FlushToken>,
    config: MemoryCacheConfig,
    maintenance: Option<JoinHandle<()>>,
}

impl LocalStore {
    /// Builds the store and, when running inside a Tokio runtime, starts the
    /// background pass that purges expired entries on the scan interval.
    /// A zero scan interval disables the background pass.
    pub fn new(config: MemoryCacheConfig, listener: Option<EvictionListener>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(EntryExpiry);
        if let Some(listener) = listener {
            builder = builder.eviction_listener(listener);
        }
        let store: Cache<String, CacheEntry> = builder.build();

        let maintenance = if config.expiration_scan_interval.is_zero() {
            None
        } else {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => Some(handle.spawn({
                    let store = store.clone();
                    let scan_interval = config.expiration_scan_interval;
                    async move {
                        let mut ticker = tokio::time::interval(scan_interval);
                        ticker.tick().await;
                        loop {
                            ticker.tick().await;
                            store.run_pending_tasks().await;
                        }
                    }
                })),
                Err(_) => {
                    warn!("No Tokio runtime, expiration scan disabled");
                    None
                }
            }
        };

        Self {
            store,
            token: ArcSwap::from_pointee(FlushToken),
            config,
            maintenance,
        }
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    pub fn default_expirations(&self) -> (Duration, Duration) {
        (self.config.sliding_ttl, self.config.absolute_ttl)
    }

    /// Token-checked lookup. An entry left behind by a flush is purged
    /// eagerly and reported as absent.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.store.get(key).await?;
        if !Arc::ptr_eq(&entry.token, &self.token.load_full()) {
            self.store.invalidate(key).await;
            return None;
        }
        Some(entry)
    }

    /// Stores `value` under `key`; returns whether the write happened.
    pub async fn set_value<T>(
        &self,
        key: &str,
        value: T,
        sliding: Duration,
        absolute: Duration,
    ) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        if !ensure_key(key, "set") {
            return false;
        }
        if self.config.log_operations {
            debug!("Setting cache = {}", key);
        }
        let entry = CacheEntry {
            value: Arc::new(value),
            token: self.token.load_full(),
            inserted_at: Instant::now(),
            sliding,
            absolute,
        };
        self.store.insert(key.to_owned(), entry).await;
        true
    }

    /// Type-checked retrieval; a stored value of a different runtime type is
    /// a miss, not an error.
    pub async fn get_value<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if !ensure_key(key, "get") {
            return None;
        }
        let Some(entry) = self.lookup(key).await else {
            if self.config.log_operations {
                debug!("Cache miss = {}", key);
            }
            return None;
        };
        match entry.value.downcast::<T>() {
            Ok(value) => {
                if self.config.log_operations {
                    debug!("Cache hit = {}", key);
                }
                Some((*value).clone())
            }
            Err(_) => {
                if self.config.log_operations {
                    debug!("Cache type mismatch = {}", key);
                }
                None
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        if !ensure_key(key, "exists") {
            return false;
        }
        self.lookup(key).await.is_some()
    }

    pub async fn remove(&self, key: &str) {
        if !ensure_key(key, "remove") {
            return;
        }
        self.store.invalidate(key).await;
    }

    /// Invalidates every entry by replacing the generation token. O(1);
    /// stale entries are purged on their next lookup or by the expiration
    /// scan once their own deadline lapses.
    pub fn flush(&self) {
        if self.config.log_operations {
            debug!("Flushing cache");
        }
        self.token.store(Arc::new(FlushToken));
    }

    pub fn entry_count(&self) -> u64 {
        self.store.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.store.run_pending_tasks().await;
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        if let Some(handle) = &self.maintenance {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sliding: u64, absolute: u64) -> CacheEntry {
        CacheEntry {
            value: Arc::new(0u32),
            token: Arc::new(FlushToken),
            inserted_at: Instant::now(),
            sliding: Duration::from_secs(sliding),
            absolute: Duration::from_secs(absolute),
        }
    }

    #[test]
    fn creation_deadline_is_earlier_of_both_windows() {
        let expiry = EntryExpiry;
        let key = "k".to_owned();

        let entry = entry(10, 30);
        let deadline = expiry.expire_after_create(&key, &entry, entry.inserted_at);
        assert_eq!(deadline, Some(Duration::from_secs(10)));
    }

    #[test]
    fn read_deadline_is_capped_by_remaining_absolute_window() {
        let expiry = EntryExpiry;
        let key = "k".to_owned();
        let entry = entry(10, 30);

        let read_at = entry.inserted_at + Duration::from_secs(25);
        let deadline = expiry.expire_after_read(&key, &entry, read_at, None, read_at);
        assert_eq!(deadline, Some(Duration::from_secs(5)));

        let read_at = entry.inserted_at + Duration::from_secs(31);
        let deadline = expiry.expire_after_read(&key, &entry, read_at, None, read_at);
        assert_eq!(deadline, Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn flush_swaps_the_token_and_hides_entries() {
        let store = LocalStore::new(MemoryCacheConfig::default(), None);
        store
            .set_value(
                "k",
                5u32,
                Duration::from_secs(300),
                Duration::from_secs(900),
            )
            .await;
        assert!(store.lookup("k").await.is_some());

        store.flush();
        assert!(store.lookup("k").await.is_none());
    }

    #[test]
    fn distinct_tokens_are_never_pointer_equal() {
        let a = Arc::new(FlushToken);
        let b = Arc::new(FlushToken);
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
