// src/provider/memory.rs
// In-process backend: entries with deadlines, purged by GC

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::SessionResult;
use crate::provider::kv::{KvBackend, KvProvider};
use crate::provider::{ProviderFactory, SessionProvider};

struct Entry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Map-backed [`KvBackend`]. Also the fake used to test provider semantics.
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
    rename: bool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            rename: true,
        }
    }

    /// Behave like a backend without native rename (memcached, redis cluster).
    pub fn without_rename(mut self) -> Self {
        self.rename = false;
        self
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.data.clone()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()> {
        let entry = Entry {
            data: value.to_vec(),
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> SessionResult<bool> {
        let now = Instant::now();
        Ok(self.entries.read().get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn ttl(&self, key: &str) -> SessionResult<Option<u64>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at.duration_since(now).as_secs()))
    }

    fn supports_rename(&self) -> bool {
        self.rename
    }

    async fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.remove(from) {
            entries.insert(to.to_string(), entry);
        }
        Ok(())
    }

    async fn purge_expired(&self) -> SessionResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let purged = (before - entries.len()) as u64;
        if purged > 0 {
            debug!("Purged {} expired in-memory sessions", purged);
        }
        Ok(purged)
    }

    async fn len(&self) -> SessionResult<Option<usize>> {
        let now = Instant::now();
        Ok(Some(self.entries.read().values().filter(|e| e.is_live(now)).count()))
    }
}

/// Factory for the `memory` provider. The connection string is ignored.
pub struct MemoryFactory;

#[async_trait]
impl ProviderFactory for MemoryFactory {
    async fn init(&self, max_lifetime: u64, _config: &str) -> SessionResult<Arc<dyn SessionProvider>> {
        Ok(Arc::new(KvProvider::new(MemoryKv::new(), max_lifetime)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_entries_invisible_then_purged() {
        let kv = MemoryKv::new();
        kv.set_ex("gone", b"x", 0).await.unwrap();
        kv.set_ex("live", b"y", 60).await.unwrap();

        assert_eq!(kv.get("gone").await.unwrap(), None);
        assert!(!kv.exists("gone").await.unwrap());
        assert_eq!(kv.len().await.unwrap(), Some(1));

        assert_eq!(kv.purge_expired().await.unwrap(), 1);
        assert_eq!(kv.purge_expired().await.unwrap(), 0);
        assert_eq!(kv.get("live").await.unwrap(), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_rename_keeps_deadline() {
        let kv = MemoryKv::new();
        kv.set_ex("a", b"v", 30).await.unwrap();
        kv.rename("a", "b").await.unwrap();
        assert!(!kv.exists("a").await.unwrap());
        let ttl = kv.ttl("b").await.unwrap().unwrap();
        assert!(ttl <= 30 && ttl >= 28);
    }

    #[tokio::test]
    async fn test_factory_ignores_connection_string() {
        let provider = MemoryFactory.init(60, "whatever").await.unwrap();
        assert_eq!(provider.name(), "memory");
        assert_eq!(provider.count().await.unwrap(), 0);
    }
}
