//! Self-issued QR tokens: build, seal and open.
//!
//! # Wire Format
//!
//! ```text
//!   kid=<urlencoded key id>&ct=<base64url_nopad(IV(12) || ciphertext || tag(16))>
//! ```
//!
//! The plaintext is the compact JSON of a [`TokenPayload`]. The key id is the
//! GCM additional authenticated data: it travels in the clear so the server
//! can pick the right session key, and any edit to it breaks the tag.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::TokenError;
use crate::config::{AES_KEY_LENGTH, TOKEN_PAYLOAD_VERSION};
use crate::crypto::encryption::{self, key_from_slice, EncryptionError};
use crate::session::now_ms;

/// Field names the payload owns. `extra` may not use them.
pub const RESERVED_FIELDS: [&str; 7] = ["v", "sid", "mid", "ts", "amt", "loc", "fid"];

// ---------------------------------------------------------------------------
// TokenPayload
// ---------------------------------------------------------------------------

/// Plaintext of a self-issued token.
///
/// Built fresh for every QR render and never stored. Serialized as compact
/// JSON; field order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Payload layout version.
    pub v: u32,
    /// Session id.
    pub sid: String,
    /// Merchant id.
    pub mid: String,
    /// Creation time, Unix milliseconds.
    pub ts: i64,
    /// Amount in minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amt: Option<i64>,
    /// Beacon location the prompt was raised at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    /// Geofence id the prompt was raised in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fid: Option<String>,
    /// Free-form string fields (`type=account` and friends).
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl TokenPayload {
    /// Start a payload stamped with the current time.
    pub fn new(session_id: impl Into<String>, merchant_id: impl Into<String>) -> Self {
        Self {
            v: TOKEN_PAYLOAD_VERSION,
            sid: session_id.into(),
            mid: merchant_id.into(),
            ts: now_ms(),
            amt: None,
            loc: None,
            fid: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn amount(mut self, amount: i64) -> Self {
        self.amt = Some(amount);
        self
    }

    pub fn location(mut self, location_id: impl Into<String>) -> Self {
        self.loc = Some(location_id.into());
        self
    }

    pub fn fence(mut self, fence_id: impl Into<String>) -> Self {
        self.fid = Some(fence_id.into());
        self
    }

    pub fn timestamp(mut self, ts_ms: i64) -> Self {
        self.ts = ts_ms;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Reject extras that would shadow a payload field.
    pub fn validate(&self) -> Result<(), TokenError> {
        match self
            .extra
            .keys()
            .find(|k| RESERVED_FIELDS.contains(&k.as_str()))
        {
            Some(k) => Err(TokenError::ReservedField(k.clone())),
            None => Ok(()),
        }
    }

    /// Compact JSON bytes of the payload.
    pub fn to_json(&self) -> Result<Vec<u8>, TokenError> {
        self.validate()?;
        serde_json::to_vec(self).map_err(|e| TokenError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Seal / open
// ---------------------------------------------------------------------------

fn enc_key(key: &[u8]) -> Result<&[u8; AES_KEY_LENGTH], TokenError> {
    key_from_slice(key).map_err(|_| TokenError::InvalidKeyLength(key.len()))
}

/// Encrypt `payload` under `enc_key` with `key_id` as AAD and format it.
pub fn seal_payload(
    key_id: &str,
    enc_key_bytes: &[u8],
    payload: &TokenPayload,
) -> Result<String, TokenError> {
    let key = enc_key(enc_key_bytes)?;
    let plaintext = payload.to_json()?;

    let sealed = encryption::seal(key, &plaintext, key_id.as_bytes())
        .map_err(|_| TokenError::EncryptFailed)?;

    debug!(key_id, bytes = sealed.len(), "token sealed");
    Ok(format!(
        "kid={}&ct={}",
        urlencoding::encode(key_id),
        URL_SAFE_NO_PAD.encode(sealed)
    ))
}

/// Build a self-issued token from its parts.
///
/// `enc_key` must be exactly 32 bytes. The session MAC key plays no part in
/// this format.
pub fn build_token(
    key_id: &str,
    enc_key: &[u8],
    session_id: &str,
    merchant_id: &str,
    amount: Option<i64>,
    extra: &BTreeMap<String, String>,
) -> Result<String, TokenError> {
    let mut payload = TokenPayload::new(session_id, merchant_id);
    payload.amt = amount;
    payload.extra = extra.clone();
    seal_payload(key_id, enc_key, &payload)
}

/// A token split into its key id and sealed bytes, not yet decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub key_id: String,
    /// `IV || ciphertext || tag`.
    pub sealed: Vec<u8>,
}

/// Split `kid=...&ct=...`. Padded base64url from older builds is accepted.
pub fn parse_token(raw: &str) -> Result<ParsedToken, TokenError> {
    let mut kid = None;
    let mut ct = None;
    for part in raw.trim().split('&') {
        match part.split_once('=') {
            Some(("kid", v)) => kid = Some(v),
            Some(("ct", v)) => ct = Some(v),
            _ => {}
        }
    }

    let kid = kid.ok_or_else(|| TokenError::Malformed("missing kid".into()))?;
    let ct = ct.ok_or_else(|| TokenError::Malformed("missing ct".into()))?;

    let key_id = urlencoding::decode(kid)
        .map_err(|_| TokenError::Malformed("kid is not valid UTF-8".into()))?
        .into_owned();
    let sealed = URL_SAFE_NO_PAD
        .decode(ct.trim_end_matches('='))
        .map_err(|_| TokenError::Malformed("ct is not base64url".into()))?;

    Ok(ParsedToken { key_id, sealed })
}

/// Decrypt a self-issued token. The inverse of [`seal_payload`].
pub fn open_token(raw: &str, enc_key_bytes: &[u8]) -> Result<(String, TokenPayload), TokenError> {
    let key = enc_key(enc_key_bytes)?;
    let parsed = parse_token(raw)?;

    let plaintext = encryption::open(key, &parsed.sealed, parsed.key_id.as_bytes()).map_err(
        |e| match e {
            EncryptionError::CiphertextTooShort => TokenError::Malformed("ct too short".into()),
            _ => TokenError::DecryptFailed,
        },
    )?;

    let payload: TokenPayload = serde_json::from_slice(&plaintext)
        .map_err(|e| TokenError::Malformed(format!("payload: {e}")))?;
    Ok((parsed.key_id, payload))
}
