// src/provider/redis.rs
// Redis backends: single node, cluster and sentinel failover
//
// Connection strings:
//   redis           host:port[,poolSize,password,dbNum]
//   redis_cluster   addr1;addr2,poolSize,password,dbNum
//   redis_sentinel  addr1;addr2,poolSize,password,dbNum[,masterName]
//
// Cluster keys can land on different slots, so RENAME is not used there and
// regenerate falls back to copy-then-delete.

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{
    ConnectionAddr, ConnectionInfo, PoolConfig, RedisConnectionInfo, Runtime, cluster, sentinel,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::conn::KvConnSpec;
use crate::error::{IntoConnectionError, SessionError, SessionResult};
use crate::provider::kv::{KvBackend, KvProvider};
use crate::provider::{ProviderFactory, SessionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisMode {
    Single,
    Cluster,
    Sentinel,
}

impl RedisMode {
    pub fn provider_name(self) -> &'static str {
        match self {
            RedisMode::Single => "redis",
            RedisMode::Cluster => "redis_cluster",
            RedisMode::Sentinel => "redis_sentinel",
        }
    }
}

enum RedisPool {
    Single(deadpool_redis::Pool),
    Cluster(cluster::Pool),
    Sentinel(sentinel::Pool),
}

/// Check out a pooled connection for one command. The connection goes back
/// to the pool when the arm's scope ends, including on `?` returns.
macro_rules! with_conn {
    ($pool:expr, $op:expr, |$conn:ident| $body:expr) => {
        match $pool {
            RedisPool::Single(p) => {
                let mut $conn = p.get().await.into_connection_error($op)?;
                $body.await.into_connection_error($op)
            }
            RedisPool::Cluster(p) => {
                let mut $conn = p.get().await.into_connection_error($op)?;
                $body.await.into_connection_error($op)
            }
            RedisPool::Sentinel(p) => {
                let mut $conn = p.get().await.into_connection_error($op)?;
                $body.await.into_connection_error($op)
            }
        }
    };
}

/// Sentinel pool config. The db number and password apply to the master
/// connections resolved through the sentinels.
fn sentinel_config(spec: &KvConnSpec) -> SessionResult<sentinel::Config> {
    let (host, port) = spec
        .addrs
        .first()
        .and_then(|addr| addr.rsplit_once(':'))
        .and_then(|(host, port)| Some((host.to_string(), port.parse::<u16>().ok()?)))
        .ok_or_else(|| SessionError::config("redis_sentinel connection string has no address"))?;

    let sentinels: Vec<String> = spec.addrs.iter().map(|a| format!("redis://{}", a)).collect();
    let mut cfg = sentinel::Config::from_urls(
        sentinels,
        spec.master_name.clone(),
        sentinel::SentinelServerType::Master,
    );
    cfg.sentinel_connection_info = Some(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            db: spec.db,
            password: spec.password.clone(),
            ..Default::default()
        },
    });
    Ok(cfg)
}

pub struct RedisKv {
    mode: RedisMode,
    pool: RedisPool,
}

impl RedisKv {
    /// Build the pool. Connections are opened lazily on first use.
    pub fn connect(mode: RedisMode, spec: &KvConnSpec) -> SessionResult<Self> {
        let pool_config = PoolConfig::new(spec.pool_size);

        let pool = match mode {
            RedisMode::Single => {
                let url = spec
                    .redis_urls(true)
                    .into_iter()
                    .next()
                    .ok_or_else(|| SessionError::config("redis connection string has no address"))?;
                let mut cfg = deadpool_redis::Config::from_url(url);
                cfg.pool = Some(pool_config);
                RedisPool::Single(
                    cfg.create_pool(Some(Runtime::Tokio1))
                        .map_err(|e| SessionError::config(format!("redis pool: {}", e)))?,
                )
            }
            RedisMode::Cluster => {
                let mut cfg = cluster::Config::from_urls(spec.redis_urls(false));
                cfg.pool = Some(pool_config);
                RedisPool::Cluster(
                    cfg.create_pool(Some(Runtime::Tokio1))
                        .map_err(|e| SessionError::config(format!("redis cluster pool: {}", e)))?,
                )
            }
            RedisMode::Sentinel => {
                let mut cfg = sentinel_config(spec)?;
                cfg.pool = Some(pool_config);
                RedisPool::Sentinel(
                    cfg.create_pool(Some(Runtime::Tokio1))
                        .map_err(|e| SessionError::config(format!("redis sentinel pool: {}", e)))?,
                )
            }
        };

        Ok(Self { mode, pool })
    }

    pub async fn ping(&self) -> SessionResult<()> {
        let _: String = with_conn!(&self.pool, "redis PING", |conn| redis::cmd("PING")
            .query_async::<String>(&mut conn))?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for RedisKv {
    fn name(&self) -> &'static str {
        self.mode.provider_name()
    }

    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> =
            with_conn!(&self.pool, "redis GET", |conn| conn.get::<_, Option<Vec<u8>>>(key))?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()> {
        // SETEX rejects a zero lifetime
        let ttl = ttl_secs.max(1);
        with_conn!(&self.pool, "redis SETEX", |conn| conn.set_ex::<_, _, ()>(key, value, ttl))
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        with_conn!(&self.pool, "redis DEL", |conn| conn.del::<_, ()>(key))
    }

    async fn exists(&self, key: &str) -> SessionResult<bool> {
        // an empty value counts as absent, as in `get`
        let len: usize = with_conn!(&self.pool, "redis STRLEN", |conn| conn.strlen::<_, usize>(key))?;
        Ok(len > 0)
    }

    async fn ttl(&self, key: &str) -> SessionResult<Option<u64>> {
        // -2 missing key, -1 no expiry
        let ttl: i64 = with_conn!(&self.pool, "redis TTL", |conn| conn.ttl::<_, i64>(key))?;
        Ok(u64::try_from(ttl).ok())
    }

    fn supports_rename(&self) -> bool {
        self.mode != RedisMode::Cluster
    }

    async fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        with_conn!(&self.pool, "redis RENAME", |conn| conn.rename::<_, _, ()>(from, to))
    }
}

/// Factory for the three redis providers
pub struct RedisFactory {
    mode: RedisMode,
}

impl RedisFactory {
    pub fn single() -> Self {
        Self { mode: RedisMode::Single }
    }

    pub fn cluster() -> Self {
        Self { mode: RedisMode::Cluster }
    }

    pub fn sentinel() -> Self {
        Self { mode: RedisMode::Sentinel }
    }
}

#[async_trait]
impl ProviderFactory for RedisFactory {
    async fn init(&self, max_lifetime: u64, config: &str) -> SessionResult<Arc<dyn SessionProvider>> {
        let spec = KvConnSpec::parse(config)?;
        let kv = RedisKv::connect(self.mode, &spec)?;

        match kv.ping().await {
            Ok(()) => info!(
                "{} session provider ready ({} nodes, pool {})",
                self.mode.provider_name(),
                spec.addrs.len(),
                spec.pool_size
            ),
            // the pool reconnects on demand; requests degrade until it does
            Err(e) => warn!("{} not reachable at startup: {}", self.mode.provider_name(), e),
        }

        Ok(Arc::new(KvProvider::new(kv, max_lifetime)))
    }
}
