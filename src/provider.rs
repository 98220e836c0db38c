//! Cache capability contracts

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::error;

use crate::CacheError;

/// Trait for values that can be stored in any cache tier
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Capability contract shared by every cache implementation.
///
/// Invalid input (an empty key) never surfaces as an error: the operation
/// no-ops, logs at error level and returns the default value.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Stores `value` under `key` with the configured default expirations.
    async fn set<T: Cacheable>(&self, key: &str, value: T) -> Result<(), CacheError>;

    /// Stores `value` with explicit sliding and absolute expirations.
    async fn set_with_expiration<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        sliding: Duration,
        absolute: Duration,
    ) -> Result<(), CacheError>;

    /// Retrieves the value stored under `key`. A missing key, or a stored
    /// value of a different runtime type, is a miss.
    async fn get<T: Cacheable>(&self, key: &str) -> Result<Option<T>, CacheError>;

    /// Returns the cached value, or invokes `factory` and stores and returns
    /// its result. There is no single-flight guarantee: concurrent misses for
    /// the same key may each invoke the factory, and the last write wins.
    async fn get_or_compute<T, F>(&self, key: &str, factory: F) -> Result<Option<T>, CacheError>
    where
        T: Cacheable,
        F: FnOnce() -> T + Send;

    /// Removes the entry stored under `key`.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every entry whose key starts with `prefix`. Implementations
    /// without key tracking return [`CacheError::Unsupported`] rather than
    /// silently doing nothing.
    async fn remove_pattern(&self, prefix: &str) -> Result<(), CacheError>;

    /// Whether an entry is stored under `key`.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Replaces the entry under `key`. Implemented as remove-then-set; a
    /// concurrent reader may observe a momentary miss.
    async fn refresh<T: Cacheable>(&self, key: &str, value: T) -> Result<(), CacheError>;

    /// Replaces the entry under `key` with an explicit time to live.
    async fn refresh_with_ttl<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Invalidates every entry.
    async fn flush(&self) -> Result<(), CacheError>;

    /// Number of stored entries; may briefly overreport entries that are
    /// already invalidated but not yet physically purged.
    async fn count(&self) -> Result<u64, CacheError>;
}

/// Additional operations of caches backed by a shared remote store.
#[async_trait]
pub trait DistributedCacheProvider: CacheProvider {
    /// Stores `value` under `key` with an explicit time to live; a zero `ttl`
    /// stores without expiry.
    async fn set_with_ttl<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Stores every pair in one batch round trip.
    async fn set_keys<T: Cacheable>(&self, pairs: &[(String, T)]) -> Result<(), CacheError>;

    /// Retrieves the values for `keys` in one batch round trip: exactly one
    /// slot per requested key, in request order, with `None` marking a miss.
    async fn get_keys<T: Cacheable>(&self, keys: &[String]) -> Result<Vec<Option<T>>, CacheError>;

    /// Removes every key in one batch round trip; empty keys are skipped.
    async fn remove_keys(&self, keys: &[String]) -> Result<(), CacheError>;
}

/// Logs and rejects operations on an empty key.
pub(crate) fn ensure_key(key: &str, operation: &str) -> bool {
    if key.is_empty() {
        error!("Cache key is empty, {} skipped", operation);
        return false;
    }
    true
}
