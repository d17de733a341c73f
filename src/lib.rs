// src/lib.rs

//! Server-side HTTP sessions: signed and encrypted cookies carrying a session
//! id, with session values kept in a pluggable backend.

pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod provider;
pub mod sid;
pub mod store;
pub mod tasks;

pub use codec::CookieCodec;
pub use config::ManagerConfig;
pub use error::{CodecError, SessionError, SessionResult};
pub use manager::{SessionManager, SessionOrigin, SessionStart};
pub use provider::{ProviderFactory, ProviderRegistry, SessionProvider};
pub use store::{SessionMap, SessionStore};
