//! tiercache - Two-tier caching with ordered event dispatch
//!
//! This library provides:
//! - [`MemoryCache`]: bounded in-memory cache (Moka) with sliding + absolute
//!   expiration and O(1) whole-cache invalidation
//! - [`TrackedMemoryCache`]: in-memory cache variant that keeps a live-key
//!   index so entries can be removed by key prefix
//! - [`RedisCache`]: Redis-backed cache with bulk operations, cluster-aware
//!   count/flush, pluggable serialization and a payload-protection hook
//! - [`EventPublisher`]: ordered, fail-fast dispatch of typed events to
//!   registered consumers
//!
//! All caches expose the same [`CacheProvider`] contract; the Redis cache
//! additionally implements [`DistributedCacheProvider`] with batch multi-key
//! operations.

mod config;
mod connection;
mod error;
mod events;
mod local_store;
mod memory_cache;
mod provider;
mod redis_cache;
mod serializer;
mod tracked_memory_cache;

pub use config::{MemoryCacheConfig, RedisCacheConfig, RedisEndpoint};
pub use connection::RedisConnectionProvider;
pub use error::CacheError;
pub use events::{Consumer, Event, EventPublisher, SubscriberRegistry, SubscriberRegistryBuilder};
pub use memory_cache::MemoryCache;
pub use provider::{CacheProvider, Cacheable, DistributedCacheProvider};
pub use redis_cache::{IdentityProtector, PayloadProtector, RedisCache};
pub use serializer::{JsonSerializer, Serializer};
pub use tracked_memory_cache::TrackedMemoryCache;

// Re-export async_trait for consumer implementations
pub use async_trait::async_trait;
