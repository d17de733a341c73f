// src/codec.rs

//! Secure cookie codec.
//!
//! Wire format, before the outer base64url:
//!
//! ```text
//! timestamp | base64url(iv ++ aes_cbc(json)) | hmac_sha256(name|timestamp|value)
//! ```
//!
//! The separator `|` never appears in the base64url alphabet, so splitting on
//! the first two separators is unambiguous even when the raw tag contains one.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

use crate::error::{CodecError, SessionError, SessionResult};
use crate::sid::generate_random_key;
use crate::store::SessionMap;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: u8 = b'|';
const IV_LEN: usize = 16;
const AES_BLOCK: usize = 16;

/// Encrypt, sign and timestamp `payload` for the cookie `name`.
pub fn encode_cookie(
    block_key: &[u8],
    hash_key: &[u8],
    name: &str,
    payload: &SessionMap,
) -> SessionResult<String> {
    encode_cookie_at(block_key, hash_key, name, payload, Utc::now().timestamp())
}

fn encode_cookie_at(
    block_key: &[u8],
    hash_key: &[u8],
    name: &str,
    payload: &SessionMap,
    now: i64,
) -> SessionResult<String> {
    let plain = serde_json::to_vec(payload)?;
    let ciphertext = encrypt(block_key, &plain)?;
    let value = URL_SAFE_NO_PAD.encode(ciphertext);
    let timestamp = now.to_string();

    let tag = sign(hash_key, name, timestamp.as_bytes(), value.as_bytes())
        .map_err(|_| SessionError::config("hash key rejected by HMAC"))?
        .finalize()
        .into_bytes();

    let mut out = Vec::with_capacity(timestamp.len() + value.len() + tag.len() + 2);
    out.extend_from_slice(timestamp.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(value.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(&tag);

    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Verify and open a cookie produced by [`encode_cookie`].
///
/// The signature is checked before the timestamp, so a forged cookie reports
/// `TamperedOrMalformed` even when its claimed time is stale.
pub fn decode_cookie(
    block_key: &[u8],
    hash_key: &[u8],
    name: &str,
    cookie: &str,
    max_age: u64,
) -> Result<SessionMap, CodecError> {
    decode_cookie_at(block_key, hash_key, name, cookie, max_age, Utc::now().timestamp())
}

fn decode_cookie_at(
    block_key: &[u8],
    hash_key: &[u8],
    name: &str,
    cookie: &str,
    max_age: u64,
    now: i64,
) -> Result<SessionMap, CodecError> {
    let raw = URL_SAFE_NO_PAD
        .decode(cookie.as_bytes())
        .map_err(|_| CodecError::TamperedOrMalformed)?;

    let mut parts = raw.splitn(3, |b| *b == SEPARATOR);
    let (timestamp, value, tag) = match (parts.next(), parts.next(), parts.next()) {
        (Some(t), Some(v), Some(m)) => (t, v, m),
        _ => return Err(CodecError::TamperedOrMalformed),
    };

    sign(hash_key, name, timestamp, value)
        .map_err(|_| CodecError::TamperedOrMalformed)?
        .verify_slice(tag)
        .map_err(|_| CodecError::TamperedOrMalformed)?;

    let issued: i64 = std::str::from_utf8(timestamp)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CodecError::TamperedOrMalformed)?;

    let window = i64::try_from(max_age).unwrap_or(i64::MAX);
    if now.saturating_sub(issued) > window || issued.saturating_sub(now) > window {
        return Err(CodecError::Expired);
    }

    let ciphertext = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| CodecError::TamperedOrMalformed)?;
    let plain = decrypt(block_key, &ciphertext).ok_or(CodecError::TamperedOrMalformed)?;

    serde_json::from_slice(&plain).map_err(|_| CodecError::TamperedOrMalformed)
}

fn sign(
    hash_key: &[u8],
    name: &str,
    timestamp: &[u8],
    value: &[u8],
) -> Result<HmacSha256, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(hash_key)?;
    mac.update(name.as_bytes());
    mac.update(&[SEPARATOR]);
    mac.update(timestamp);
    mac.update(&[SEPARATOR]);
    mac.update(value);
    Ok(mac)
}

fn cbc_encrypt<E: KeyIvInit + BlockEncryptMut>(key: &[u8], iv: &[u8], plain: &[u8]) -> Option<Vec<u8>> {
    E::new_from_slices(key, iv)
        .ok()
        .map(|enc| enc.encrypt_padded_vec_mut::<Pkcs7>(plain))
}

fn cbc_decrypt<D: KeyIvInit + BlockDecryptMut>(key: &[u8], iv: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    D::new_from_slices(key, iv)
        .ok()?
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .ok()
}

/// AES-CBC with a random IV prepended to the output.
fn encrypt(key: &[u8], plain: &[u8]) -> SessionResult<Vec<u8>> {
    let iv = generate_random_key(IV_LEN);
    let body = match key.len() {
        16 => cbc_encrypt::<cbc::Encryptor<aes::Aes128>>(key, &iv, plain),
        24 => cbc_encrypt::<cbc::Encryptor<aes::Aes192>>(key, &iv, plain),
        32 => cbc_encrypt::<cbc::Encryptor<aes::Aes256>>(key, &iv, plain),
        _ => None,
    }
    .ok_or_else(|| SessionError::config("cipher key must be 16, 24 or 32 bytes"))?;

    let mut out = iv;
    out.extend_from_slice(&body);
    Ok(out)
}

fn decrypt(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < IV_LEN + AES_BLOCK || (data.len() - IV_LEN) % AES_BLOCK != 0 {
        return None;
    }
    let (iv, body) = data.split_at(IV_LEN);
    match key.len() {
        16 => cbc_decrypt::<cbc::Decryptor<aes::Aes128>>(key, iv, body),
        24 => cbc_decrypt::<cbc::Decryptor<aes::Aes192>>(key, iv, body),
        32 => cbc_decrypt::<cbc::Decryptor<aes::Aes256>>(key, iv, body),
        _ => None,
    }
}

/// Validated keys plus the cookie name they are bound to.
#[derive(Clone)]
pub struct CookieCodec {
    block_key: Vec<u8>,
    hash_key: Vec<u8>,
    name: String,
}

impl CookieCodec {
    pub fn new(block_key: &[u8], hash_key: &[u8], name: impl Into<String>) -> SessionResult<Self> {
        if !matches!(block_key.len(), 16 | 24 | 32) {
            return Err(SessionError::config(format!(
                "block key must be 16, 24 or 32 bytes, got {}",
                block_key.len()
            )));
        }
        if hash_key.is_empty() {
            return Err(SessionError::config("hash key must not be empty"));
        }
        Ok(Self {
            block_key: block_key.to_vec(),
            hash_key: hash_key.to_vec(),
            name: name.into(),
        })
    }

    /// Keys live only as long as the process; cookies do not survive a restart.
    pub fn with_random_keys(name: impl Into<String>) -> Self {
        Self {
            block_key: generate_random_key(16),
            hash_key: generate_random_key(32),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encode(&self, payload: &SessionMap) -> SessionResult<String> {
        encode_cookie(&self.block_key, &self.hash_key, &self.name, payload)
    }

    pub fn decode(&self, cookie: &str, max_age: u64) -> Result<SessionMap, CodecError> {
        decode_cookie(&self.block_key, &self.hash_key, &self.name, cookie, max_age)
    }
}

impl fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieCodec")
            .field("name", &self.name)
            .field("block_key_len", &self.block_key.len())
            .finish_non_exhaustive()
    }
}
