//! Cache error types

use redis::RedisError;

/// Cache-related errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("No reachable Redis endpoint")]
    NoEndpoint,
}
