// src/error.rs
// Error types shared by the codec, providers and manager

use thiserror::Error;

/// Why a cookie failed validation. Callers treat every variant as
/// "no valid session".
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("cookie expired")]
    Expired,
    #[error("cookie tampered or malformed")]
    TamperedOrMalformed,
}

/// Session error type
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),
    #[error("Unknown provider: {0} (forgotten registration?)")]
    UnknownProvider(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SessionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Startup-class errors that should abort the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::DuplicateProvider(_) | Self::UnknownProvider(_)
        )
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

/// Session operation result type
pub type SessionResult<T> = Result<T, SessionError>;

/// Extension trait to map backend client errors into connection errors
pub trait IntoConnectionError<T> {
    fn into_connection_error(self, context: &str) -> SessionResult<T>;
}

impl<T, E: std::fmt::Display> IntoConnectionError<T> for Result<T, E> {
    fn into_connection_error(self, context: &str) -> SessionResult<T> {
        self.map_err(|e| SessionError::Connection(format!("{}: {}", context, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SessionError::config("bad").is_fatal());
        assert!(SessionError::DuplicateProvider("memory".into()).is_fatal());
        assert!(!SessionError::connection("down").is_fatal());
        assert!(!SessionError::Codec(CodecError::Expired).is_fatal());
    }

    #[test]
    fn test_into_connection_error_keeps_context() {
        let res: Result<(), &str> = Err("refused");
        let err = res.into_connection_error("redis GET").unwrap_err();
        assert_eq!(err.to_string(), "Connection error: redis GET: refused");
    }
}
