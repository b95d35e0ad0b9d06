//! Server-minted tokens.
//!
//! The key server can mint the QR string itself. It returns the opaque
//! token, its issue time and `HMAC-SHA256(mac_key, token || ts)`, where `ts`
//! is written as a decimal string. The device checks that tag with its
//! session MAC key before showing anything.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::error::TokenError;
use crate::crypto::kdf::{hmac_sha256, verify_hmac_sha256};
use crate::session::api::QrTokenResponse;

fn mac_input(token: &str, ts: i64) -> Vec<u8> {
    let mut data = token.as_bytes().to_vec();
    data.extend_from_slice(ts.to_string().as_bytes());
    data
}

/// Tag the server computes for `(token, ts)`, standard base64.
pub fn issued_token_mac(mac_key: &[u8], token: &str, ts: i64) -> Result<String, TokenError> {
    let tag = hmac_sha256(mac_key, &mac_input(token, ts))
        .map_err(|_| TokenError::IntegrityCheckFailed)?;
    Ok(STANDARD.encode(tag))
}

/// Check a server-minted token. Constant-time tag comparison.
pub fn verify_issued_token(response: &QrTokenResponse, mac_key: &[u8]) -> Result<(), TokenError> {
    let tag = STANDARD
        .decode(response.hmac_b64.trim())
        .map_err(|_| TokenError::Malformed("hmac is not base64".into()))?;

    if verify_hmac_sha256(mac_key, &mac_input(&response.token, response.ts), &tag) {
        Ok(())
    } else {
        Err(TokenError::IntegrityCheckFailed)
    }
}
