// src/provider/mod.rs
// Session provider contract and the built-in backends

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SessionResult;
use crate::store::SessionStore;

pub mod kv;
pub mod memcache;
pub mod memory;
pub mod redis;
pub mod registry;
pub mod sql;

pub use registry::ProviderRegistry;

/// Persistence contract every session backend implements.
///
/// `read` and `regenerate` take `self: Arc<Self>` because the returned store
/// keeps a handle back to its provider for `release`.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// Provider name for logging/debugging
    fn name(&self) -> &'static str;

    /// Stored session for `sid`, or a fresh empty one. Absence is not an error.
    async fn read(self: Arc<Self>, sid: &str) -> SessionResult<SessionStore>;

    async fn exists(&self, sid: &str) -> SessionResult<bool>;

    /// Move `old_sid`'s values and remaining lifetime to `new_sid`.
    /// When `old_sid` is unknown the result is an empty store at `new_sid`.
    async fn regenerate(self: Arc<Self>, old_sid: &str, new_sid: &str) -> SessionResult<SessionStore>;

    /// Idempotent delete
    async fn destroy(&self, sid: &str) -> SessionResult<()>;

    /// Purge expired sessions, returning how many were removed.
    /// Backends that expire entries themselves return 0.
    async fn gc(&self) -> SessionResult<u64>;

    /// Live sessions, or 0 when the backend cannot count exactly.
    async fn count(&self) -> SessionResult<usize>;

    /// Write-back path used by [`SessionStore::release`].
    async fn write(&self, sid: &str, data: Vec<u8>) -> SessionResult<()>;
}

/// Builds a provider from `(max_lifetime, connection spec)` at startup.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn init(&self, max_lifetime: u64, config: &str) -> SessionResult<Arc<dyn SessionProvider>>;
}
