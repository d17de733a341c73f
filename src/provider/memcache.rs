// src/provider/memcache.rs
// Memcached cluster backend
//
// Connection string: addr1;addr2 (each host:port). The memcache client is
// blocking, so every call runs on the blocking pool; its r2d2 pools hand
// connections back when the call returns.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::conn::parse_addrs;
use crate::error::{IntoConnectionError, SessionError, SessionResult};
use crate::provider::kv::{KvBackend, KvProvider};
use crate::provider::{ProviderFactory, SessionProvider};

/// memcached reads expirations above 30 days as absolute unix times
const RELATIVE_EXPIRY_LIMIT: u64 = 60 * 60 * 24 * 30;

pub struct MemcacheKv {
    client: Arc<memcache::Client>,
}

impl MemcacheKv {
    pub fn connect(spec: &str) -> SessionResult<Self> {
        let urls: Vec<String> = parse_addrs(spec)?
            .into_iter()
            .map(|addr| format!("memcache://{}", addr))
            .collect();
        let client = memcache::Client::connect(urls).into_connection_error("memcache connect")?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| SessionError::connection(format!("memcache {} task: {}", op, e)))?
            .into_connection_error(op)
    }
}

fn expiration(ttl_secs: u64) -> u32 {
    let secs = if ttl_secs > RELATIVE_EXPIRY_LIMIT {
        chrono::Utc::now().timestamp().max(0) as u64 + ttl_secs
    } else {
        ttl_secs
    };
    u32::try_from(secs).unwrap_or(u32::MAX)
}

#[async_trait]
impl KvBackend for MemcacheKv {
    fn name(&self) -> &'static str {
        "memcache"
    }

    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let key = key.to_string();
        let value: Option<Vec<u8>> = self.blocking("memcache GET", move |c| c.get(&key)).await?;
        // an empty item is what an aborted regenerate leaves behind
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()> {
        let key = key.to_string();
        let value = value.to_vec();
        let exp = expiration(ttl_secs);
        self.blocking("memcache SET", move |c| c.set(&key, value.as_slice(), exp))
            .await
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        let key = key.to_string();
        self.blocking("memcache DELETE", move |c| c.delete(&key).map(|_| ()))
            .await
    }

    async fn exists(&self, key: &str) -> SessionResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Factory for the `memcache` provider
pub struct MemcacheFactory;

#[async_trait]
impl ProviderFactory for MemcacheFactory {
    async fn init(&self, max_lifetime: u64, config: &str) -> SessionResult<Arc<dyn SessionProvider>> {
        let spec = config.to_string();
        // building the client dials every server
        let kv = tokio::task::spawn_blocking(move || MemcacheKv::connect(&spec))
            .await
            .map_err(|e| SessionError::connection(format!("memcache connect task: {}", e)))??;
        info!("Memcache session provider ready ({})", config);
        Ok(Arc::new(KvProvider::new(kv, max_lifetime)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_switches_to_absolute() {
        assert_eq!(expiration(3600), 3600);
        assert!(expiration(RELATIVE_EXPIRY_LIMIT + 1) as u64 > RELATIVE_EXPIRY_LIMIT * 10);
    }

    #[test]
    fn test_malformed_connection_string() {
        assert!(MemcacheKv::connect("").unwrap_err().is_fatal());
        assert!(MemcacheKv::connect("no-port").unwrap_err().is_fatal());
    }

    #[tokio::test]
    #[ignore = "requires memcached on 127.0.0.1:11211"]
    async fn test_live_roundtrip() {
        let provider = MemcacheFactory.init(60, "127.0.0.1:11211").await.unwrap();
        let store = provider.clone().read("memcache-test-sid").await.unwrap();
        store.set("name", "user001").unwrap();
        store.release().await.unwrap();

        let moved = provider.clone().regenerate("memcache-test-sid", "memcache-test-sid2").await.unwrap();
        assert_eq!(moved.get::<String>("name").as_deref(), Some("user001"));
        assert!(!provider.exists("memcache-test-sid").await.unwrap());
        provider.destroy("memcache-test-sid2").await.unwrap();
    }
}
