// src/config/mod.rs
// Session manager configuration: JSON document or SESSION_* environment

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::sid::DEFAULT_SID_BYTES;

pub mod conn;

pub use conn::KvConnSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    // ── Cookie
    #[serde(rename = "cookieName")]
    pub cookie_name: String,
    #[serde(rename = "enableSetCookie")]
    pub enable_set_cookie: bool,
    pub secure: bool,
    #[serde(rename = "cookieLifeTime")]
    pub cookie_lifetime: u64,
    pub domain: Option<String>,

    // ── Lifetimes (seconds)
    #[serde(rename = "gclifetime")]
    pub gc_lifetime: u64,
    #[serde(rename = "maxLifetime")]
    pub max_lifetime: u64,

    // ── Provider
    #[serde(rename = "providerName")]
    pub provider_name: String,
    #[serde(rename = "ProviderConfig")]
    pub provider_config: String,

    // ── Session id
    #[serde(rename = "sessionIDLength")]
    pub session_id_length: usize,
    #[serde(rename = "sessionIDPrefix")]
    pub session_id_prefix: String,
    #[serde(rename = "EnableSidInHTTPHeader")]
    pub enable_sid_in_http_header: bool,
    #[serde(rename = "SessionNameInHTTPHeader")]
    pub session_name_in_http_header: String,

    // ── Codec keys (random per process when unset)
    #[serde(rename = "hashKey")]
    pub hash_key: Option<String>,
    #[serde(rename = "blockKey")]
    pub block_key: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sessionid".to_string(),
            enable_set_cookie: true,
            secure: false,
            cookie_lifetime: 0,
            domain: None,
            gc_lifetime: 3600,
            max_lifetime: 0,
            provider_name: "memory".to_string(),
            provider_config: String::new(),
            session_id_length: DEFAULT_SID_BYTES,
            session_id_prefix: String::new(),
            enable_sid_in_http_header: false,
            session_name_in_http_header: String::new(),
            hash_key: None,
            block_key: None,
        }
    }
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            // Trim whitespace and trailing comments before parsing
            let clean_val = val.split('#').next().unwrap_or("").trim();
            match clean_val.parse::<T>() {
                Ok(parsed) => {
                    debug!("Config: {} = {} (from environment)", key, clean_val);
                    parsed
                }
                Err(_) => {
                    warn!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ManagerConfig {
    /// Parse a JSON config document, e.g.
    /// `{"cookieName":"gosessionid","gclifetime":3600,"ProviderConfig":"127.0.0.1:6379"}`
    pub fn from_json(doc: &str) -> SessionResult<Self> {
        let config: Self = serde_json::from_str(doc)
            .map_err(|e| SessionError::config(format!("Failed to parse session config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> SessionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SessionError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Build from `SESSION_*` variables, reading `.env` first if present.
    pub fn from_env() -> SessionResult<Self> {
        if dotenvy::dotenv().is_err() {
            debug!(".env file not found, using process environment");
        }

        let d = Self::default();
        let config = Self {
            cookie_name: env_var_or("SESSION_COOKIE_NAME", d.cookie_name),
            enable_set_cookie: env_var_or("SESSION_ENABLE_SET_COOKIE", d.enable_set_cookie),
            secure: env_var_or("SESSION_SECURE", d.secure),
            cookie_lifetime: env_var_or("SESSION_COOKIE_LIFETIME", d.cookie_lifetime),
            domain: env_opt("SESSION_DOMAIN"),
            gc_lifetime: env_var_or("SESSION_GC_LIFETIME", d.gc_lifetime),
            max_lifetime: env_var_or("SESSION_MAX_LIFETIME", d.max_lifetime),
            provider_name: env_var_or("SESSION_PROVIDER", d.provider_name),
            provider_config: env_var_or("SESSION_PROVIDER_CONFIG", d.provider_config),
            session_id_length: env_var_or("SESSION_ID_LENGTH", d.session_id_length),
            session_id_prefix: env_var_or("SESSION_ID_PREFIX", d.session_id_prefix),
            enable_sid_in_http_header: env_var_or("SESSION_SID_IN_HEADER", d.enable_sid_in_http_header),
            session_name_in_http_header: env_var_or("SESSION_HEADER_NAME", d.session_name_in_http_header),
            hash_key: env_opt("SESSION_HASH_KEY"),
            block_key: env_opt("SESSION_BLOCK_KEY"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.cookie_name.is_empty() || !self.cookie_name.chars().all(is_token_char) {
            return Err(SessionError::config(format!(
                "invalid cookie name '{}'",
                self.cookie_name
            )));
        }
        if self.provider_name.trim().is_empty() {
            return Err(SessionError::config("providerName must be set"));
        }
        if self.gc_lifetime == 0 {
            return Err(SessionError::config("gclifetime must be positive"));
        }
        if self.enable_sid_in_http_header {
            let name = &self.session_name_in_http_header;
            if name.is_empty() || axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(SessionError::config(format!(
                    "SessionNameInHTTPHeader '{}' is not a valid header name",
                    name
                )));
            }
        }
        if let Some(key) = &self.block_key {
            if !matches!(key.len(), 16 | 24 | 32) {
                return Err(SessionError::config("blockKey must be 16, 24 or 32 bytes"));
            }
        }
        if self.hash_key.as_deref().is_some_and(str::is_empty) {
            return Err(SessionError::config("hashKey must not be empty"));
        }
        Ok(())
    }

    /// Backend lifetime of a session; falls back to the GC lifetime.
    pub fn effective_max_lifetime(&self) -> u64 {
        if self.max_lifetime > 0 {
            self.max_lifetime
        } else {
            self.gc_lifetime
        }
    }

    /// How long a cookie's signature stays acceptable.
    pub fn cookie_max_age(&self) -> u64 {
        if self.cookie_lifetime > 0 {
            self.cookie_lifetime
        } else {
            self.effective_max_lifetime()
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Session Config:\n\
            - Provider: {}\n\
            - Cookie: {} (set-cookie {}, secure {})\n\
            - GC every {} secs, max lifetime {} secs",
            self.provider_name,
            self.cookie_name,
            if self.enable_set_cookie { "ON" } else { "OFF" },
            if self.secure { "ON" } else { "OFF" },
            self.gc_lifetime,
            self.effective_max_lifetime(),
        )
    }
}

// RFC 6265 cookie-name token characters
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}
