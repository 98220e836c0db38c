//! Cache configuration

use std::time::Duration;

/// Configuration for the bounded in-memory caches
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries; each entry weighs 1 against this limit
    pub max_capacity: u64,
    /// Default sliding expiration applied by `set`
    pub sliding_ttl: Duration,
    /// Default absolute expiration applied by `set`.
    ///
    /// Both sliding and absolute expiration are always applied together;
    /// with only one of them set, the other kind of staleness is unguarded.
    pub absolute_ttl: Duration,
    /// Interval of the background pass that purges expired entries
    pub expiration_scan_interval: Duration,
    /// Emit debug logs for cache hits, misses and writes
    pub log_operations: bool,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1000,
            sliding_ttl: Duration::from_secs(300), // 5 minutes
            absolute_ttl: Duration::from_secs(900), // 15 minutes
            expiration_scan_interval: Duration::from_secs(60),
            log_operations: false,
        }
    }
}

/// A Redis host/port pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisEndpoint {
    pub host: String,
    pub port: u16,
}

impl RedisEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for RedisEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Configuration for the Redis-backed cache
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Known endpoints, tried in order for the shared connection
    pub endpoints: Vec<RedisEndpoint>,
    /// Logical database index
    pub database: i64,
    /// Credential, if the server requires one
    pub password: Option<String>,
    /// Connect over TLS
    pub use_tls: bool,
    /// Host name to present for TLS validation (defaults to the endpoint host)
    pub tls_host: Option<String>,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Commands the client is allowed to issue; None means unrestricted
    pub command_allowlist: Option<Vec<String>>,
    /// Default TTL applied by `set`; zero stores without expiry
    pub default_ttl: Duration,
    /// Emit info logs for cache hits, misses and removals
    pub log_operations: bool,
    /// Run payloads through the protect/unprotect hook
    pub protect_payloads: bool,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![RedisEndpoint::new("localhost", 6379)],
            database: 0,
            password: None,
            use_tls: false,
            tls_host: None,
            connect_timeout: Duration::from_secs(5),
            command_allowlist: None,
            default_ttl: Duration::from_secs(1800), // 30 mins
            log_operations: false,
            protect_payloads: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_defaults_guard_both_expirations() {
        let config = MemoryCacheConfig::default();
        assert!(!config.sliding_ttl.is_zero());
        assert!(!config.absolute_ttl.is_zero());
        assert!(config.sliding_ttl < config.absolute_ttl);
    }

    #[test]
    fn redis_defaults_point_at_localhost() {
        let config = RedisCacheConfig::default();
        assert_eq!(config.endpoints, vec![RedisEndpoint::new("localhost", 6379)]);
        assert_eq!(config.database, 0);
        assert_eq!(config.default_ttl, Duration::from_secs(1800));
        assert!(!config.protect_payloads);
    }
}
