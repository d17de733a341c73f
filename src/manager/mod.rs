// src/manager/mod.rs

//! Session manager: bridges a request's cookie to one provider.
//!
//! Per request:
//! - no cookie            -> Anonymous, new sid
//! - valid cookie         -> Attached to the cookie's sid while it is live,
//!                           otherwise Anonymous with a new sid
//! - tampered or expired  -> Anonymous, new sid; the old cookie is discarded
//!
//! A backend connection failure never fails the request: the session falls
//! back to a local empty store under a new sid.
//!
//! The manager keeps no per-request state and is shared behind an `Arc`.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header::SET_COOKIE};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codec::CookieCodec;
use crate::config::ManagerConfig;
use crate::error::{CodecError, SessionError, SessionResult};
use crate::provider::{ProviderRegistry, SessionProvider};
use crate::sid::{ensure_secure_random, generate_session_id};
use crate::store::{SessionMap, SessionStore};
use crate::tasks::{GcHandle, spawn_gc};

pub mod cookie;
pub mod middleware;

/// Key of the session id inside the encoded cookie payload
const SID_FIELD: &str = "sid";

/// What the inbound request carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieState {
    Missing,
    Valid(String),
    Invalid(CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Fresh sid minted for this request
    Anonymous,
    /// Continues the sid from the request's cookie
    Attached,
}

/// Result of starting (or regenerating) a session for one request
#[derive(Debug)]
pub struct SessionStart {
    pub store: Arc<SessionStore>,
    pub origin: SessionOrigin,
    /// Encoded token to send back; `None` when the client already holds it
    pub token: Option<String>,
}

impl SessionStart {
    pub fn session_id(&self) -> &str {
        self.store.session_id()
    }
}

pub struct SessionManager {
    provider: Arc<dyn SessionProvider>,
    codec: CookieCodec,
    config: ManagerConfig,
    sid_header: Option<HeaderName>,
}

impl SessionManager {
    /// Validate `config`, build the codec and initialize the configured provider.
    pub async fn new(registry: &ProviderRegistry, config: ManagerConfig) -> SessionResult<Self> {
        config.validate()?;
        ensure_secure_random()?;

        let codec = match (&config.block_key, &config.hash_key) {
            (Some(block), Some(hash)) => {
                CookieCodec::new(block.as_bytes(), hash.as_bytes(), config.cookie_name.clone())?
            }
            (None, None) => {
                warn!("No cookie keys configured; sessions will not survive a restart");
                CookieCodec::with_random_keys(config.cookie_name.clone())
            }
            _ => {
                return Err(SessionError::config(
                    "hashKey and blockKey must be configured together",
                ));
            }
        };

        let provider = registry
            .init(
                &config.provider_name,
                config.effective_max_lifetime(),
                &config.provider_config,
            )
            .await?;

        Ok(Self::with_parts(provider, codec, config))
    }

    /// Assemble from an already initialized provider and codec.
    pub fn with_parts(provider: Arc<dyn SessionProvider>, codec: CookieCodec, config: ManagerConfig) -> Self {
        let sid_header = if config.enable_sid_in_http_header {
            HeaderName::from_bytes(config.session_name_in_http_header.as_bytes()).ok()
        } else {
            None
        };
        info!("{}", config.summary());

        Self {
            provider,
            codec,
            config,
            sid_header,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn provider(&self) -> Arc<dyn SessionProvider> {
        self.provider.clone()
    }

    /// Encoded token for `sid`
    pub fn encode_sid(&self, sid: &str) -> SessionResult<String> {
        let mut payload = SessionMap::new();
        payload.insert(SID_FIELD.to_string(), Value::String(sid.to_string()));
        self.codec.encode(&payload)
    }

    fn decode_token(&self, token: &str) -> CookieState {
        match self.codec.decode(token, self.config.cookie_max_age()) {
            Ok(payload) => match payload.get(SID_FIELD).and_then(Value::as_str) {
                Some(sid) if !sid.is_empty() => CookieState::Valid(sid.to_string()),
                _ => CookieState::Invalid(CodecError::TamperedOrMalformed),
            },
            Err(e) => CookieState::Invalid(e),
        }
    }

    /// Classify the request's session token. The cookie wins over the header.
    pub fn cookie_state(&self, headers: &HeaderMap) -> CookieState {
        let token = cookie::find_cookie(headers, &self.config.cookie_name).or_else(|| {
            self.sid_header
                .as_ref()
                .and_then(|name| headers.get(name))
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .filter(|value| !value.is_empty())
        });

        match token {
            None => CookieState::Missing,
            Some(token) => self.decode_token(&token),
        }
    }

    fn new_sid(&self) -> String {
        generate_session_id(self.config.session_id_length, &self.config.session_id_prefix)
    }

    /// Backend store for `sid`, or a local empty one when the backend fails,
    /// so the request can still be served.
    async fn read_or_local(&self, sid: &str) -> SessionStore {
        match self.provider.clone().read(sid).await {
            Ok(store) => store,
            Err(e) => {
                warn!("Session backend {} unavailable: {}", self.provider.name(), e);
                SessionStore::new(sid, SessionMap::new(), self.provider.clone())
            }
        }
    }

    /// Fresh session under a new sid.
    async fn start_anonymous(&self) -> SessionResult<SessionStart> {
        let sid = self.new_sid();
        let store = self.read_or_local(&sid).await;
        let token = self.encode_sid(&sid)?;

        Ok(SessionStart {
            store: Arc::new(store),
            origin: SessionOrigin::Anonymous,
            token: Some(token),
        })
    }

    /// Live backend store for `sid`, `None` when the sid is unknown.
    async fn attach(&self, sid: &str) -> SessionResult<Option<SessionStore>> {
        if !self.provider.exists(sid).await? {
            return Ok(None);
        }
        self.provider.clone().read(sid).await.map(Some)
    }

    /// Attach the request to its session or start a new one.
    ///
    /// A validly signed cookie only attaches while its sid is still live in
    /// the backend; a destroyed, regenerated or expired sid is never revived.
    pub async fn session_start(&self, headers: &HeaderMap) -> SessionResult<SessionStart> {
        match self.cookie_state(headers) {
            CookieState::Valid(sid) => match self.attach(&sid).await {
                Ok(Some(store)) => Ok(SessionStart {
                    store: Arc::new(store),
                    origin: SessionOrigin::Attached,
                    token: None,
                }),
                Ok(None) => {
                    debug!("Session {} no longer exists; starting a new one", sid);
                    self.start_anonymous().await
                }
                Err(e @ SessionError::Serialization(_)) => {
                    warn!("Session {} is unreadable ({}); starting a new one", sid, e);
                    self.start_anonymous().await
                }
                Err(e) => {
                    warn!("Failed to read session {}: {}", sid, e);
                    self.start_anonymous().await
                }
            },
            CookieState::Invalid(reason) => {
                debug!("Discarding session cookie: {}", reason);
                self.start_anonymous().await
            }
            CookieState::Missing => self.start_anonymous().await,
        }
    }

    /// Set-Cookie value for `token`, if cookies are enabled.
    pub fn set_cookie_header(&self, token: &str) -> SessionResult<Option<HeaderValue>> {
        if !self.config.enable_set_cookie {
            return Ok(None);
        }
        cookie::to_header_value(&cookie::session_cookie(&self.config, token)).map(Some)
    }

    /// Attach the session token to a response when the client needs it.
    pub fn write_response_headers(&self, start: &SessionStart, headers: &mut HeaderMap) -> SessionResult<()> {
        let Some(token) = &start.token else {
            return Ok(());
        };
        if let Some(value) = self.set_cookie_header(token)? {
            headers.append(SET_COOKIE, value);
        }
        if let Some(name) = &self.sid_header {
            let value = HeaderValue::from_str(token)
                .map_err(|e| SessionError::config(format!("token not representable as a header: {}", e)))?;
            headers.insert(name.clone(), value);
        }
        Ok(())
    }

    fn removal_header(&self) -> SessionResult<Option<HeaderValue>> {
        if !self.config.enable_set_cookie {
            return Ok(None);
        }
        cookie::to_header_value(&cookie::removal_cookie(&self.config)).map(Some)
    }

    /// Delete the request's session and expire its cookie.
    /// Returns `None` when the request carried no session.
    pub async fn session_destroy(&self, headers: &HeaderMap) -> SessionResult<Option<HeaderValue>> {
        match self.cookie_state(headers) {
            CookieState::Missing => Ok(None),
            CookieState::Valid(sid) => {
                self.provider.destroy(&sid).await?;
                debug!("Destroyed session {}", sid);
                self.removal_header()
            }
            CookieState::Invalid(_) => self.removal_header(),
        }
    }

    /// Destroy the session behind an already started store.
    pub async fn destroy_store(&self, store: &SessionStore) -> SessionResult<Option<HeaderValue>> {
        self.provider.destroy(store.session_id()).await?;
        debug!("Destroyed session {}", store.session_id());
        self.removal_header()
    }

    async fn regenerate_from(&self, old_sid: Option<&str>) -> SessionResult<SessionStart> {
        let new_sid = self.new_sid();

        let (store, origin) = match old_sid {
            Some(old) => match self.provider.clone().regenerate(old, &new_sid).await {
                Ok(store) => {
                    debug!("Regenerated session {} -> {}", old, new_sid);
                    (store, SessionOrigin::Attached)
                }
                Err(SessionError::Serialization(e)) => {
                    warn!("Session {} is unreadable ({}); regenerating empty", old, e);
                    (self.read_or_local(&new_sid).await, SessionOrigin::Anonymous)
                }
                Err(SessionError::Connection(e)) => {
                    warn!("Failed to regenerate session {}: {}", old, e);
                    let local = SessionStore::new(new_sid.clone(), SessionMap::new(), self.provider.clone());
                    (local, SessionOrigin::Anonymous)
                }
                Err(e) => return Err(e),
            },
            None => (self.read_or_local(&new_sid).await, SessionOrigin::Anonymous),
        };

        let token = self.encode_sid(&new_sid)?;

        Ok(SessionStart {
            store: Arc::new(store),
            origin,
            token: Some(token),
        })
    }

    /// Move the request's session to a new sid, keeping its values.
    /// Without a valid cookie this starts a fresh session.
    pub async fn session_regenerate_id(&self, headers: &HeaderMap) -> SessionResult<SessionStart> {
        match self.cookie_state(headers) {
            CookieState::Valid(sid) => self.regenerate_from(Some(&sid)).await,
            _ => self.regenerate_from(None).await,
        }
    }

    /// Persist `store` and move it to a new sid.
    pub async fn regenerate_store(&self, store: &SessionStore) -> SessionResult<SessionStart> {
        if let Err(e) = store.release().await {
            warn!("Failed to persist session {} before regenerate: {}", store.session_id(), e);
        }
        self.regenerate_from(Some(store.session_id())).await
    }

    /// Session for a known sid, e.g. from an out-of-band channel.
    pub async fn get_session_store(&self, sid: &str) -> SessionResult<Arc<SessionStore>> {
        Ok(Arc::new(self.provider.clone().read(sid).await?))
    }

    pub async fn active_session_count(&self) -> SessionResult<usize> {
        self.provider.count().await
    }

    /// One GC pass, outside the background schedule
    pub async fn gc_once(&self) -> SessionResult<u64> {
        self.provider.gc().await
    }

    /// Start periodic GC every `gclifetime` seconds.
    pub fn spawn_gc(&self) -> GcHandle {
        spawn_gc(self.provider.clone(), Duration::from_secs(self.config.gc_lifetime))
    }
}
