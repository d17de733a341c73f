// src/provider/kv.rs

//! Generic provider over a narrow key-value contract.
//!
//! Every key-value backend (in-memory, memcached, redis single/cluster/sentinel)
//! only has to implement [`KvBackend`]; the session semantics live here once.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::provider::SessionProvider;
use crate::store::{SessionMap, SessionStore, decode_values};

/// Minimal key-value operations a session backend needs.
///
/// Each call acquires and returns its own pooled connection.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>>;

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()>;

    async fn delete(&self, key: &str) -> SessionResult<()>;

    async fn exists(&self, key: &str) -> SessionResult<bool>;

    /// Remaining lifetime in seconds, `None` when unknown or unbounded.
    ///
    /// Copy-then-delete regenerate carries this over to the new key. Backends
    /// that keep the default (memcached has no TTL query) restart the session
    /// at the full max lifetime instead.
    async fn ttl(&self, _key: &str) -> SessionResult<Option<u64>> {
        Ok(None)
    }

    /// Whether [`KvBackend::rename`] is a native single-call move
    fn supports_rename(&self) -> bool {
        false
    }

    async fn rename(&self, _from: &str, _to: &str) -> SessionResult<()> {
        Err(SessionError::config(format!("{} has no native rename", self.name())))
    }

    async fn purge_expired(&self) -> SessionResult<u64> {
        Ok(0)
    }

    /// Exact number of live keys, if the backend can tell
    async fn len(&self) -> SessionResult<Option<usize>> {
        Ok(None)
    }
}

/// Session provider backed by any [`KvBackend`]
pub struct KvProvider<B> {
    backend: B,
    max_lifetime: u64,
}

impl<B: KvBackend> KvProvider<B> {
    pub fn new(backend: B, max_lifetime: u64) -> Self {
        Self { backend, max_lifetime }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn load(&self, sid: &str) -> SessionResult<Option<SessionMap>> {
        match self.backend.get(sid).await? {
            Some(data) => Ok(Some(decode_values(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<B: KvBackend> SessionProvider for KvProvider<B> {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    async fn read(self: Arc<Self>, sid: &str) -> SessionResult<SessionStore> {
        let values = self.load(sid).await?.unwrap_or_default();
        Ok(SessionStore::new(sid, values, self))
    }

    async fn exists(&self, sid: &str) -> SessionResult<bool> {
        self.backend.exists(sid).await
    }

    async fn regenerate(self: Arc<Self>, old_sid: &str, new_sid: &str) -> SessionResult<SessionStore> {
        let Some(data) = self.backend.get(old_sid).await? else {
            debug!("Regenerate: {} unknown, starting empty session {}", old_sid, new_sid);
            return Ok(SessionStore::new(new_sid, SessionMap::new(), self));
        };

        // Decode before moving anything so undecodable bytes stay where they are.
        let values = decode_values(&data)?;

        if self.backend.supports_rename() {
            self.backend.rename(old_sid, new_sid).await?;
        } else {
            let ttl = self
                .backend
                .ttl(old_sid)
                .await?
                .filter(|t| *t > 0)
                .unwrap_or(self.max_lifetime);
            self.backend.set_ex(new_sid, &data, ttl).await?;
            if let Err(e) = self.backend.delete(old_sid).await {
                // the new entry is in place; the old one will expire on its own
                warn!("Regenerate: failed to delete old session {}: {}", old_sid, e);
            }
        }

        Ok(SessionStore::new(new_sid, values, self))
    }

    async fn destroy(&self, sid: &str) -> SessionResult<()> {
        self.backend.delete(sid).await
    }

    async fn gc(&self) -> SessionResult<u64> {
        self.backend.purge_expired().await
    }

    async fn count(&self) -> SessionResult<usize> {
        Ok(self.backend.len().await?.unwrap_or(0))
    }

    async fn write(&self, sid: &str, data: Vec<u8>) -> SessionResult<()> {
        self.backend.set_ex(sid, &data, self.max_lifetime).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryKv;
    use crate::store::encode_values;
    use serde_json::json;

    fn provider(backend: MemoryKv) -> Arc<KvProvider<MemoryKv>> {
        Arc::new(KvProvider::new(backend, 3600))
    }

    async fn seed(p: &Arc<KvProvider<MemoryKv>>, sid: &str) {
        let store = p.clone().read(sid).await.unwrap();
        store.set("name", "user001").unwrap();
        store.set("visits", 3).unwrap();
        store.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_unknown_is_empty() {
        let p = provider(MemoryKv::new());
        let store = p.clone().read("nobody").await.unwrap();
        assert_eq!(store.session_id(), "nobody");
        assert!(store.is_empty());
        assert!(!p.exists("nobody").await.unwrap());
    }

    async fn check_regenerate(p: Arc<KvProvider<MemoryKv>>) {
        seed(&p, "old").await;
        let before = p.clone().read("old").await.unwrap().snapshot();

        let store = p.clone().regenerate("old", "new").await.unwrap();
        assert_eq!(store.session_id(), "new");
        assert_eq!(store.snapshot(), before);

        assert_eq!(p.clone().read("new").await.unwrap().snapshot(), before);
        assert!(p.clone().read("old").await.unwrap().is_empty());
        assert!(!p.exists("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_regenerate_with_native_rename() {
        check_regenerate(provider(MemoryKv::new())).await;
    }

    #[tokio::test]
    async fn test_regenerate_copy_then_delete() {
        check_regenerate(provider(MemoryKv::new().without_rename())).await;
    }

    #[tokio::test]
    async fn test_regenerate_preserves_remaining_ttl() {
        let p = provider(MemoryKv::new().without_rename());
        p.backend().set_ex("old", &encode_values(&SessionMap::new()).unwrap(), 120).await.unwrap();
        p.clone().regenerate("old", "new").await.unwrap();
        let ttl = p.backend().ttl("new").await.unwrap().unwrap();
        assert!(ttl <= 120 && ttl > 100, "ttl was {}", ttl);
    }

    /// Memory store that cannot report lifetimes or rename keys
    struct NoTtl(MemoryKv);

    #[async_trait]
    impl KvBackend for NoTtl {
        fn name(&self) -> &'static str {
            "no-ttl"
        }

        async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
            self.0.get(key).await
        }

        async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()> {
            self.0.set_ex(key, value, ttl_secs).await
        }

        async fn delete(&self, key: &str) -> SessionResult<()> {
            self.0.delete(key).await
        }

        async fn exists(&self, key: &str) -> SessionResult<bool> {
            self.0.exists(key).await
        }
    }

    #[tokio::test]
    async fn test_regenerate_without_ttl_restarts_lifetime() {
        let p = Arc::new(KvProvider::new(NoTtl(MemoryKv::new()), 3600));
        p.backend().set_ex("old", &encode_values(&SessionMap::new()).unwrap(), 120).await.unwrap();

        p.clone().regenerate("old", "new").await.unwrap();
        assert!(!p.exists("old").await.unwrap());
        let ttl = p.backend().0.ttl("new").await.unwrap().unwrap();
        assert!(ttl > 3500, "ttl was {}", ttl);
    }

    #[tokio::test]
    async fn test_regenerate_unknown_old_sid() {
        let p = provider(MemoryKv::new());
        let store = p.clone().regenerate("ghost", "fresh").await.unwrap();
        assert_eq!(store.session_id(), "fresh");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_payload_left_in_place() {
        let p = provider(MemoryKv::new());
        p.backend().set_ex("bad", b"\x00not json", 60).await.unwrap();

        let err = p.clone().read("bad").await.unwrap_err();
        assert!(matches!(err, SessionError::Serialization(_)));

        let err = p.clone().regenerate("bad", "other").await.unwrap_err();
        assert!(matches!(err, SessionError::Serialization(_)));

        assert_eq!(p.backend().get("bad").await.unwrap().unwrap(), b"\x00not json".to_vec());
        assert!(!p.exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let p = provider(MemoryKv::new());
        seed(&p, "sid").await;
        p.destroy("sid").await.unwrap();
        p.destroy("sid").await.unwrap();
        assert!(!p.exists("sid").await.unwrap());
    }

    #[tokio::test]
    async fn test_count_and_values() {
        let p = provider(MemoryKv::new());
        seed(&p, "a").await;
        seed(&p, "b").await;
        assert_eq!(p.count().await.unwrap(), 2);
        let store = p.clone().read("a").await.unwrap();
        assert_eq!(store.get_value("visits"), Some(json!(3)));
    }
}
