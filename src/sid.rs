// src/sid.rs
// Session id and key generation

use rand::rngs::OsRng;
use rand::{RngCore, TryRngCore};
use tracing::debug;

use crate::error::{SessionError, SessionResult};

/// Default number of random bytes in a session id (hex doubles the length)
pub const DEFAULT_SID_BYTES: usize = 16;

/// Returns `n` bytes from the thread-local CSPRNG.
pub fn generate_random_key(n: usize) -> Vec<u8> {
    let mut key = vec![0u8; n];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Probe the OS entropy source once at startup.
///
/// Request-time generation goes through the thread rng, which is seeded from
/// the same source, so a failure here is the only place it can surface.
pub fn ensure_secure_random() -> SessionResult<()> {
    let mut probe = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut probe)
        .map_err(|e| SessionError::config(format!("no secure random source: {}", e)))?;
    debug!("OS random source available");
    Ok(())
}

/// New opaque session id: optional prefix followed by hex-encoded random bytes.
pub fn generate_session_id(len: usize, prefix: &str) -> String {
    let len = if len == 0 { DEFAULT_SID_BYTES } else { len };
    format!("{}{}", prefix, hex::encode(generate_random_key(len)))
}
