//! Encrypted login tokens and the password auth header.
//!
//! # Token layout
//!
//! ```text
//! MESH_BASE64( nonce[12] ‖ tag[16] ‖ AES-256-GCM(claims JSON) )
//! ```
//!
//! The AES key is the first 32 bytes of the 80-byte login key. The nonce
//! comes from the OS CSPRNG and is never reused: every call mints a new
//! one, so two tokens for the same inputs differ.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use mc_domain::error::{Error, Result};
use mc_protocol::MESH_BASE64;

/// Length of a login key in hex characters (80 bytes).
pub const LOGIN_KEY_HEX_LEN: usize = 160;

/// AES-256 key length taken from the front of the login key.
const AES_KEY_LEN: usize = 32;

/// AES-GCM nonce length (96 bits).
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length (128 bits).
const TAG_LEN: usize = 16;

/// The claim set sealed inside a login token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginClaims {
    /// Fully-qualified user id, `user/<domain>/<username>`.
    pub userid: String,
    pub domainid: String,
    /// Unix seconds at which the token was minted.
    pub time: i64,
}

/// Check that `key_hex` is a well-formed login key.
pub fn validate_login_key(key_hex: &str) -> Result<()> {
    decode_login_key(key_hex).map(|_| ())
}

fn decode_login_key(key_hex: &str) -> Result<Vec<u8>> {
    if key_hex.len() != LOGIN_KEY_HEX_LEN {
        return Err(Error::InvalidKey(format!(
            "expected {LOGIN_KEY_HEX_LEN} hex characters, got {}",
            key_hex.len()
        )));
    }
    hex::decode(key_hex).map_err(|e| Error::InvalidKey(format!("not valid hex: {e}")))
}

fn cipher_for(key_hex: &str) -> Result<Aes256Gcm> {
    let key = decode_login_key(key_hex)?;
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..AES_KEY_LEN])))
}

/// Build an encrypted login token for `username` in `domain`, stamped
/// with `unix_time`.
///
/// # Errors
///
/// [`Error::InvalidKey`] if `key_hex` is not exactly 160 hex characters.
pub fn make_login_token(
    username: &str,
    key_hex: &str,
    domain: &str,
    unix_time: i64,
) -> Result<String> {
    let cipher = cipher_for(key_hex)?;

    let claims = LoginClaims {
        userid: format!("user/{domain}/{username}"),
        domainid: domain.to_owned(),
        time: unix_time,
    };
    let mut buffer = serde_json::to_vec(&claims)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
        .map_err(|e| Error::InvalidKey(format!("encryption failed: {e}")))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&tag);
    sealed.extend_from_slice(&buffer);

    Ok(MESH_BASE64.encode(sealed))
}

/// [`make_login_token`] stamped with the current wall-clock time.
pub fn make_login_token_now(username: &str, key_hex: &str, domain: &str) -> Result<String> {
    make_login_token(username, key_hex, domain, Utc::now().timestamp())
}

/// Decrypt and verify a login token with the key that produced it.
///
/// # Errors
///
/// [`Error::InvalidKey`] for malformed key material, [`Error::InvalidToken`]
/// when the token is not decodable, too short, fails authentication or
/// does not contain a claim set.
pub fn open_login_token(token: &str, key_hex: &str) -> Result<LoginClaims> {
    let cipher = cipher_for(key_hex)?;

    let sealed = MESH_BASE64
        .decode(token)
        .map_err(|e| Error::InvalidToken(format!("bad encoding: {e}")))?;
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::InvalidToken(format!(
            "token is {} bytes, shorter than nonce and tag",
            sealed.len()
        )));
    }

    let (nonce, rest) = sealed.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);
    let mut buffer = ciphertext.to_vec();

    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| Error::InvalidToken("authentication failed".into()))?;

    serde_json::from_slice(&buffer)
        .map_err(|e| Error::InvalidToken(format!("claims are not valid JSON: {e}")))
}

/// Build the `x-meshauth` header value:
/// `b64(username), b64(password)[, b64(otp)]`.
///
/// An empty `otp` is treated as absent.
pub fn make_password_auth_header(username: &str, password: &str, otp: Option<&str>) -> String {
    let mut header = format!("{}, {}", STANDARD.encode(username), STANDARD.encode(password));
    if let Some(otp) = otp.filter(|t| !t.is_empty()) {
        header.push_str(", ");
        header.push_str(&STANDARD.encode(otp));
    }
    header
}
