// src/store.rs
// Live session values for one request, written back on release

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::provider::SessionProvider;

/// Session contents: unique string keys, any JSON-serializable value
pub type SessionMap = HashMap<String, Value>;

/// Serialize session values for backend storage.
pub fn encode_values(values: &SessionMap) -> SessionResult<Vec<u8>> {
    Ok(serde_json::to_vec(values)?)
}

/// Decode stored bytes. An empty payload is an empty session.
pub fn decode_values(data: &[u8]) -> SessionResult<SessionMap> {
    if data.is_empty() {
        return Ok(SessionMap::new());
    }
    serde_json::from_slice(data)
        .map_err(|e| SessionError::serialization(format!("undecodable session payload: {}", e)))
}

/// One session's values, guarded by a per-instance lock.
///
/// Mutations stay local until [`SessionStore::release`] hands the serialized
/// map to the provider.
pub struct SessionStore {
    sid: String,
    values: RwLock<SessionMap>,
    provider: Arc<dyn SessionProvider>,
}

impl SessionStore {
    pub fn new(sid: impl Into<String>, values: SessionMap, provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            sid: sid.into(),
            values: RwLock::new(values),
            provider,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.sid
    }

    /// Typed read. Returns `None` if the key is missing or holds another type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let values = self.values.read();
        values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> SessionResult<()> {
        let value = serde_json::to_value(value)?;
        self.values.write().insert(key.into(), value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }

    /// Remove every value
    pub fn flush(&self) {
        self.values.write().clear();
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub fn snapshot(&self) -> SessionMap {
        self.values.read().clone()
    }

    /// Persist the current values through the provider.
    pub async fn release(&self) -> SessionResult<()> {
        // Serialize under the read lock, then drop it before awaiting the backend.
        let data = {
            let values = self.values.read();
            encode_values(&values)?
        };
        debug!("Releasing session {} ({} bytes) to {}", self.sid, data.len(), self.provider.name());
        self.provider.write(&self.sid, data).await
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("sid", &self.sid)
            .field("len", &self.len())
            .field("provider", &self.provider.name())
            .finish()
    }
}
