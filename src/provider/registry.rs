// src/provider/registry.rs
// Provider registry: name -> factory, populated before the manager starts

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{SessionError, SessionResult};
use crate::provider::memcache::MemcacheFactory;
use crate::provider::memory::MemoryFactory;
use crate::provider::redis::RedisFactory;
use crate::provider::sql::SqliteFactory;
use crate::provider::{ProviderFactory, SessionProvider};

/// Registry for session provider factories
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every built-in backend
    pub fn with_defaults() -> SessionResult<Self> {
        let mut registry = Self::new();
        registry.register("memory", Arc::new(MemoryFactory))?;
        registry.register("memcache", Arc::new(MemcacheFactory))?;
        registry.register("sqlite", Arc::new(SqliteFactory))?;
        registry.register("redis", Arc::new(RedisFactory::single()))?;
        registry.register("redis_cluster", Arc::new(RedisFactory::cluster()))?;
        registry.register("redis_sentinel", Arc::new(RedisFactory::sentinel()))?;
        Ok(registry)
    }

    /// Register a factory. Names are unique; registering twice is an error.
    pub fn register(&mut self, name: &str, factory: Arc<dyn ProviderFactory>) -> SessionResult<()> {
        if self.factories.contains_key(name) {
            return Err(SessionError::DuplicateProvider(name.to_string()));
        }
        debug!("Registered session provider: {}", name);
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn get(&self, name: &str) -> SessionResult<Arc<dyn ProviderFactory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownProvider(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up `name` and initialize its provider.
    pub async fn init(
        &self,
        name: &str,
        max_lifetime: u64,
        config: &str,
    ) -> SessionResult<Arc<dyn SessionProvider>> {
        let factory = self.get(name)?;
        let provider = factory.init(max_lifetime, config).await?;
        info!("Session provider '{}' initialized (max lifetime {}s)", name, max_lifetime);
        Ok(provider)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = ProviderRegistry::with_defaults().unwrap();
        assert_eq!(
            registry.names(),
            vec!["memcache", "memory", "redis", "redis_cluster", "redis_sentinel", "sqlite"]
        );
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ProviderRegistry::new();
        registry.register("memcache", Arc::new(MemcacheFactory)).unwrap();
        let err = registry.register("memcache", Arc::new(MemcacheFactory)).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateProvider(ref n) if n == "memcache"));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let registry = ProviderRegistry::with_defaults().unwrap();
        let err = registry.init("couchbase", 60, "").await.err().unwrap();
        assert!(matches!(err, SessionError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_init_memory() {
        let registry = ProviderRegistry::with_defaults().unwrap();
        let provider = registry.init("memory", 60, "").await.unwrap();
        assert_eq!(provider.name(), "memory");
    }
}
