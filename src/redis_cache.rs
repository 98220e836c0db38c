//! Redis-backed cache
//!
//! Shared cache on top of [`RedisConnectionProvider`]: single-key and bulk
//! operations, cluster-aware count and flush, pluggable serialization and a
//! payload-protection hook. Per-key atomicity and TTL enforcement are
//! delegated entirely to Redis; connectivity failures propagate to the caller
//! with no retry at this layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::PubSub;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::connection::RedisConnectionProvider;
use crate::provider::{ensure_key, CacheProvider, Cacheable, DistributedCacheProvider};
use crate::serializer::{JsonSerializer, Serializer};
use crate::CacheError;

/// Transform applied to serialized payloads on their way to and from Redis.
///
/// Identity by default; the pluggable point for payload encryption. Hook
/// failures are caught and logged, and the operation degrades to the
/// untransformed payload (fail-open, scoped to this hook only).
pub trait PayloadProtector: Send + Sync {
    fn protect(&self, payload: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;

    fn unprotect(&self, payload: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// Pass-through protector
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProtector;

impl PayloadProtector for IdentityProtector {
    fn protect(&self, payload: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        Ok(payload.to_owned())
    }

    fn unprotect(&self, payload: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        Ok(payload.to_owned())
    }
}

/// Cache backed by a shared Redis deployment.
///
/// Cheap to clone; clones share the same connection provider.
#[derive(Clone)]
pub struct RedisCache<S = JsonSerializer, P = IdentityProtector> {
    provider: Arc<RedisConnectionProvider>,
    serializer: S,
    protector: P,
}

impl RedisCache {
    pub fn new(provider: Arc<RedisConnectionProvider>) -> Self {
        Self {
            provider,
            serializer: JsonSerializer,
            protector: IdentityProtector,
        }
    }
}

impl<S: Serializer, P: PayloadProtector> RedisCache<S, P> {
    /// Builds a cache with a custom serializer and payload protector.
    pub fn with_parts(provider: Arc<RedisConnectionProvider>, serializer: S, protector: P) -> Self {
        Self {
            provider,
            serializer,
            protector,
        }
    }

    /// The pub/sub connection of the underlying provider.
    pub async fn subscriber(&self) -> Result<PubSub, CacheError> {
        self.provider.subscriber().await
    }

    fn log_operations(&self) -> bool {
        self.provider.config().log_operations
    }

    fn protect_enabled(&self) -> bool {
        self.provider.config().protect_payloads
    }

    fn default_ttl(&self) -> Duration {
        self.provider.config().default_ttl
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<String, CacheError> {
        let payload = self.serializer.serialize(value)?;
        if !self.protect_enabled() {
            return Ok(payload);
        }
        match self.protector.protect(&payload) {
            Ok(protected) => Ok(protected),
            Err(e) => {
                error!("Payload protection failed, storing unprotected: {}", e);
                Ok(payload)
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, payload: String) -> Result<T, CacheError> {
        let payload = if self.protect_enabled() {
            match self.protector.unprotect(&payload) {
                Ok(unprotected) => unprotected,
                Err(e) => {
                    error!("Payload unprotection failed, using raw payload: {}", e);
                    payload
                }
            }
        } else {
            payload
        };
        self.serializer.deserialize(&payload)
    }

    /// Decodes one MGET response slot per requested key, preserving order.
    fn decode_bulk<T: DeserializeOwned>(
        &self,
        payloads: Vec<Option<String>>,
    ) -> Result<Vec<Option<T>>, CacheError> {
        payloads
            .into_iter()
            .map(|payload| payload.map(|p| self.decode(p)).transpose())
            .collect()
    }

    async fn write(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.provider.database().await?;
        if ttl.is_zero() {
            conn.set::<_, _, ()>(key, payload).await?;
        } else {
            conn.set_ex::<_, _, ()>(key, payload, ttl.as_secs()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Serializer, P: PayloadProtector> CacheProvider for RedisCache<S, P> {
    async fn set<T: Cacheable>(&self, key: &str, value: T) -> Result<(), CacheError> {
        self.set_with_ttl(key, value, self.default_ttl()).await
    }

    async fn set_with_expiration<T: Cacheable>(
        &self,
        _key: &str,
        _value: T,
        _sliding: Duration,
        _absolute: Duration,
    ) -> Result<(), CacheError> {
        // Redis has no sliding expiration
        Err(CacheError::Unsupported(
            "sliding expiration on the Redis cache",
        ))
    }

    async fn get<T: Cacheable>(&self, key: &str) -> Result<Option<T>, CacheError> {
        if !ensure_key(key, "get") {
            return Ok(None);
        }
        let mut conn = self.provider.database().await?;
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(payload) => {
                if self.log_operations() {
                    info!("Cache hit: {}", key);
                }
                Ok(Some(self.decode(payload)?))
            }
            None => {
                if self.log_operations() {
                    info!("Cache miss: {}", key);
                }
                Ok(None)
            }
        }
    }

    async fn get_or_compute<T, F>(&self, key: &str, factory: F) -> Result<Option<T>, CacheError>
    where
        T: Cacheable,
        F: FnOnce() -> T + Send,
    {
        if !ensure_key(key, "get_or_compute") {
            return Ok(None);
        }
        if let Some(value) = self.get(key).await? {
            return Ok(Some(value));
        }
        let value = factory();
        self.set(key, value.clone()).await?;
        Ok(Some(value))
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        if !ensure_key(key, "remove") {
            return Ok(());
        }
        if self.log_operations() {
            info!("Removing key: {}", key);
        }
        let mut conn = self.provider.database().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn remove_pattern(&self, _prefix: &str) -> Result<(), CacheError> {
        Err(CacheError::Unsupported(
            "pattern removal on the Redis cache",
        ))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        if !ensure_key(key, "exists") {
            return Ok(false);
        }
        let mut conn = self.provider.database().await?;
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn refresh<T: Cacheable>(&self, key: &str, value: T) -> Result<(), CacheError> {
        self.refresh_with_ttl(key, value, self.default_ttl()).await
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
        self.remove(key).await?;
        self.set_with_ttl(key, value, ttl).await
    }

    /// Flushes the selected database on every discovered master endpoint.
    /// Destructive and cluster-wide; invoke deliberately.
    async fn flush(&self) -> Result<(), CacheError> {
        if self.log_operations() {
            info!("Flushing all master endpoints");
        }
        for endpoint in &self.provider.masters().await? {
            let mut conn = self.provider.server_connection(endpoint).await?;
            redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        }
        Ok(())
    }

    /// Sums the database size over every discovered master endpoint.
    async fn count(&self) -> Result<u64, CacheError> {
        let mut total = 0u64;
        for endpoint in &self.provider.masters().await? {
            let mut conn = self.provider.server_connection(endpoint).await?;
            let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
            total += size;
        }
        Ok(total)
    }
}

#[async_trait]
impl<S: Serializer, P: PayloadProtector> DistributedCacheProvider for RedisCache<S, P> {
    async fn set_with_ttl<T: Cacheable>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if !ensure_key(key, "set") {
            return Ok(());
        }
        if self.log_operations() {
            info!("Setting key: {}", key);
        }
        let payload = self.encode(&value)?;
        self.write(key, payload, ttl).await
    }

    async fn set_keys<T: Cacheable>(&self, pairs: &[(String, T)]) -> Result<(), CacheError> {
        let mut items = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            if !ensure_key(key, "set_keys") {
                continue;
            }
            items.push((key.as_str(), self.encode(value)?));
        }
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.provider.database().await?;
        let mut cmd = redis::cmd("MSET");
        for (key, payload) in &items {
            cmd.arg(key).arg(payload);
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn get_keys<T: Cacheable>(&self, keys: &[String]) -> Result<Vec<Option<T>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        if self.log_operations() {
            info!("Bulk get: {}", keys.join(","));
        }
        let mut conn = self.provider.database().await?;
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let payloads: Vec<Option<String>> = cmd.query_async(&mut conn).await?;
        self.decode_bulk(payloads)
    }

    async fn remove_keys(&self, keys: &[String]) -> Result<(), CacheError> {
        let keys: Vec<&str> = keys
            .iter()
            .filter(|key| !key.is_empty())
            .map(String::as_str)
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        if self.log_operations() {
            info!("Removing keys: {}", keys.join(","));
        }
        let mut conn = self.provider.database().await?;
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RedisCacheConfig;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u32,
        name: String,
    }

    fn profile() -> Profile {
        Profile {
            id: 1,
            name: "ada".to_owned(),
        }
    }

    /// Reverses the payload; round-trips through protect/unprotect.
    struct ReversingProtector;

    impl PayloadProtector for ReversingProtector {
        fn protect(
            &self,
            payload: &str,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Ok(payload.chars().rev().collect())
        }

        fn unprotect(
            &self,
            payload: &str,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Ok(payload.chars().rev().collect())
        }
    }

    struct FailingProtector;

    impl PayloadProtector for FailingProtector {
        fn protect(&self, _: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Err("protector offline".into())
        }

        fn unprotect(&self, _: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Err("protector offline".into())
        }
    }

    fn provider(protect_payloads: bool) -> Arc<RedisConnectionProvider> {
        Arc::new(RedisConnectionProvider::new(RedisCacheConfig {
            protect_payloads,
            ..Default::default()
        }))
    }

    #[test]
    fn protected_payloads_round_trip() {
        let cache = RedisCache::with_parts(provider(true), JsonSerializer, ReversingProtector);

        let payload = cache.encode(&profile()).unwrap();
        // the stored form is transformed
        assert_ne!(payload, serde_json::to_string(&profile()).unwrap());

        let back: Profile = cache.decode(payload).unwrap();
        assert_eq!(back, profile());
    }

    #[test]
    fn disabled_hook_is_skipped_entirely() {
        let cache = RedisCache::with_parts(provider(false), JsonSerializer, FailingProtector);

        let payload = cache.encode(&profile()).unwrap();
        assert_eq!(payload, serde_json::to_string(&profile()).unwrap());

        let back: Profile = cache.decode(payload).unwrap();
        assert_eq!(back, profile());
    }

    #[test]
    fn hook_failures_fall_open_to_the_plain_payload() {
        let cache = RedisCache::with_parts(provider(true), JsonSerializer, FailingProtector);

        // protect fails: the plain serialized payload is stored
        let payload = cache.encode(&profile()).unwrap();
        assert_eq!(payload, serde_json::to_string(&profile()).unwrap());

        // unprotect fails: the raw payload is deserialized as-is
        let back: Profile = cache.decode(payload).unwrap();
        assert_eq!(back, profile());
    }

    #[test]
    fn bulk_decode_keeps_one_ordered_slot_per_key() {
        let cache = RedisCache::new(provider(false));

        let decoded: Vec<Option<u32>> = cache
            .decode_bulk(vec![Some("1".to_owned()), None, Some("2".to_owned())])
            .unwrap();
        assert_eq!(decoded, vec![Some(1), None, Some(2)]);
    }

    #[test]
    fn bulk_decode_keeps_the_slot_count_with_protection_enabled() {
        let cache = RedisCache::with_parts(provider(true), JsonSerializer, ReversingProtector);

        let hit: String = cache.encode(&"a".to_owned()).unwrap();
        let decoded: Vec<Option<String>> = cache.decode_bulk(vec![Some(hit), None]).unwrap();
        assert_eq!(decoded, vec![Some("a".to_owned()), None]);
    }

    #[tokio::test]
    async fn pattern_removal_is_unsupported() {
        let cache = RedisCache::new(provider(false));
        let result = cache.remove_pattern("user-").await;
        assert!(matches!(result, Err(CacheError::Unsupported(_))));
    }

    #[tokio::test]
    async fn sliding_expiration_is_unsupported() {
        let cache = RedisCache::new(provider(false));
        let result = cache
            .set_with_expiration(
                "k",
                1u32,
                Duration::from_secs(1),
                Duration::from_secs(2),
            )
            .await;
        assert!(matches!(result, Err(CacheError::Unsupported(_))));
    }

    #[tokio::test]
    async fn empty_keys_no_op_without_touching_the_connection() {
        // no Redis server is running in these tests; the validation
        // short-circuit must return before any connection is attempted
        let cache = RedisCache::new(provider(false));

        cache.set("", 1u32).await.unwrap();
        assert_eq!(cache.get::<u32>("").await.unwrap(), None);
        assert!(!cache.exists("").await.unwrap());
        cache.remove("").await.unwrap();
        cache.refresh("", 1u32).await.unwrap();
        assert_eq!(cache.get_or_compute("", || 1u32).await.unwrap(), None);
        cache.remove_keys(&["".to_owned()]).await.unwrap();
    }
}
