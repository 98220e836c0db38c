//! Redis connection management
//!
//! Lazily establishes one shared managed connection for the whole process,
//! hands out pub/sub connections, and discovers the master (write-capable)
//! endpoints of standalone and clustered topologies.

use redis::aio::{ConnectionManager, ConnectionManagerConfig, MultiplexedConnection, PubSub};
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::{CacheError, RedisCacheConfig, RedisEndpoint};

pub struct RedisConnectionProvider {
    config: RedisCacheConfig,
    manager: OnceCell<ConnectionManager>,
}

impl RedisConnectionProvider {
    pub fn new(config: RedisCacheConfig) -> Self {
        Self {
            config,
            manager: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &RedisCacheConfig {
        &self.config
    }

    /// The shared managed connection. Established lazily, exactly once per
    /// process; every caller reuses it. Endpoints are tried in configured
    /// order and the first one that connects wins.
    pub async fn database(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self.manager.get_or_try_init(|| self.establish()).await?;
        Ok(manager.clone())
    }

    /// A dedicated pub/sub connection, using the same connection settings.
    pub async fn subscriber(&self) -> Result<PubSub, CacheError> {
        let mut last_error = None;
        for endpoint in &self.config.endpoints {
            let client = Client::open(self.connection_info(endpoint))?;
            match client.get_async_pubsub().await {
                Ok(pubsub) => return Ok(pubsub),
                Err(e) => {
                    warn!("Pub/sub connection to {} failed: {}", endpoint, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map(CacheError::Redis).unwrap_or(CacheError::NoEndpoint))
    }

    /// Discovers the master (write-capable) endpoints.
    ///
    /// Unreachable endpoints are skipped. The first endpoint reporting
    /// cluster mode contributes all non-replica nodes of its cluster and ends
    /// the search, so multiple independent clusters are not merged (a known
    /// scalability limitation). For standalone topologies the first reachable
    /// non-replica endpoint wins.
    pub async fn masters(&self) -> Result<Vec<RedisEndpoint>, CacheError> {
        let mut masters = Vec::new();
        for endpoint in &self.config.endpoints {
            let mut conn = match self.server_connection(endpoint).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Skipping unreachable endpoint {}: {}", endpoint, e);
                    continue;
                }
            };

            let cluster_info: String = redis::cmd("INFO")
                .arg("cluster")
                .query_async(&mut conn)
                .await?;
            if info_field(&cluster_info, "cluster_enabled") == Some("1") {
                let nodes: String = redis::cmd("CLUSTER")
                    .arg("NODES")
                    .query_async(&mut conn)
                    .await?;
                masters.extend(parse_cluster_masters(&nodes));
                break;
            }

            let replication: String = redis::cmd("INFO")
                .arg("replication")
                .query_async(&mut conn)
                .await?;
            if info_field(&replication, "role") == Some("master") {
                masters.push(endpoint.clone());
                break;
            }
        }
        Ok(masters)
    }

    /// A dedicated connection to one endpoint, for server-level commands
    /// (DBSIZE, FLUSHDB) that must reach a specific node.
    pub(crate) async fn server_connection(
        &self,
        endpoint: &RedisEndpoint,
    ) -> Result<MultiplexedConnection, CacheError> {
        let client = Client::open(self.connection_info(endpoint))?;
        Ok(client.get_multiplexed_async_connection().await?)
    }

    /// Deterministic string form of the connection settings, for diagnostics.
    /// The credential is masked.
    pub fn connection_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut seen: Vec<&RedisEndpoint> = Vec::new();
        for endpoint in &self.config.endpoints {
            if !seen.contains(&endpoint) {
                seen.push(endpoint);
                parts.push(endpoint.to_string());
            }
        }
        parts.push(format!("defaultDatabase={}", self.config.database));
        parts.push(format!(
            "connectTimeout={}",
            self.config.connect_timeout.as_millis()
        ));
        if self.config.password.is_some() {
            parts.push("password=*****".to_owned());
        }
        if self.config.use_tls {
            parts.push("ssl=True".to_owned());
            if let Some(host) = &self.config.tls_host {
                parts.push(format!("sslHost={}", host));
            }
        }
        if let Some(commands) = &self.config.command_allowlist {
            parts.push(format!("commands={}", commands.join(";")));
        }
        parts.join(",")
    }

    async fn establish(&self) -> Result<ConnectionManager, CacheError> {
        let mut last_error = None;
        for endpoint in &self.config.endpoints {
            let manager_config =
                ConnectionManagerConfig::new().set_connection_timeout(self.config.connect_timeout);
            let client = Client::open(self.connection_info(endpoint))?;
            match ConnectionManager::new_with_config(client, manager_config).await {
                Ok(manager) => {
                    debug!("Redis connection established to {}", endpoint);
                    return Ok(manager);
                }
                Err(e) => {
                    warn!("Redis endpoint {} unreachable: {}", endpoint, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map(CacheError::Redis).unwrap_or(CacheError::NoEndpoint))
    }

    fn connection_info(&self, endpoint: &RedisEndpoint) -> ConnectionInfo {
        let addr = if self.config.use_tls {
            ConnectionAddr::TcpTls {
                host: self
                    .config
                    .tls_host
                    .clone()
                    .unwrap_or_else(|| endpoint.host.clone()),
                port: endpoint.port,
                insecure: false,
                tls_params: None,
            }
        } else {
            ConnectionAddr::Tcp(endpoint.host.clone(), endpoint.port)
        };
        ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: self.config.database,
                password: self.config.password.clone(),
                ..Default::default()
            },
        }
    }
}

/// Looks up one `field:value` line of an INFO section.
fn info_field<'a>(info: &'a str, field: &str) -> Option<&'a str> {
    info.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        (name == field).then(|| value.trim_end_matches('\r'))
    })
}

/// Parses `CLUSTER NODES` output into the non-replica node endpoints.
fn parse_cluster_masters(nodes: &str) -> Vec<RedisEndpoint> {
    nodes
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _id = fields.next()?;
            let addr = fields.next()?;
            let flags = fields.next()?;
            if flags.split(',').any(|flag| flag == "slave") {
                return None;
            }
            let addr = addr.split('@').next()?;
            let (host, port) = addr.rsplit_once(':')?;
            Some(RedisEndpoint::new(host, port.parse().ok()?))
        })
        .collect()
}
