//! Merchant-signed tokens: sign on the merchant side, verify on the device.
//!
//! # Wire Format
//!
//! ```text
//!   <base64url_nopad(payload JSON)>.<base64url_nopad(ECDSA P-256 signature)>
//! ```
//!
//! The signature covers the *canonical* JSON of the payload: compact, object
//! keys sorted. The verifier re-canonicalizes whatever JSON it received, so a
//! merchant backend that emits keys in another order still verifies.
//!
//! # Checks, in order
//!
//! 1. parse, 2. known merchant, 3. signature, 4. beacon location,
//! 5. geofence, 6. beacon nonce, 7. expiry. The first failure wins.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{TokenError, VerifyError};
use crate::crypto::signatures::{parse_verifying_key, sign_der, verify_signature};
use crate::gate::BeaconMeta;
use crate::whitelist::Whitelist;

/// Payload of a merchant-presented code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantPayload {
    pub merchant_id: String,
    pub location_id: String,
    /// Must equal the nonce the store beacon is currently advertising.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Expiry, Unix seconds.
    pub expiry: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Serializes a JSON value with every object's keys in byte order, at any
/// depth, whatever map type `serde_json` was built with.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let sorted: BTreeMap<&str, Canonical<'_>> =
                    map.iter().map(|(k, v)| (k.as_str(), Canonical(v))).collect();
                sorted.serialize(serializer)
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Compact JSON with sorted keys.
fn canonical_json(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&Canonical(value))
}

/// Produce a signed merchant token. Used by merchant tooling and tests.
pub fn sign_merchant_payload(
    signing_key: &SigningKey,
    payload: &MerchantPayload,
) -> Result<String, TokenError> {
    let value = serde_json::to_value(payload).map_err(|e| TokenError::Serialization(e.to_string()))?;
    let canonical = canonical_json(&value).map_err(|e| TokenError::Serialization(e.to_string()))?;
    let signature = sign_der(signing_key, &canonical);
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&canonical),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

fn decode_part(part: &str, what: &str) -> Result<Vec<u8>, VerifyError> {
    URL_SAFE_NO_PAD
        .decode(part.trim().trim_end_matches('='))
        .map_err(|_| VerifyError::Parse(format!("{what} is not base64url")))
}

/// Verify a merchant token against the current proximity context.
pub fn verify_token(
    raw: &str,
    whitelist: &Whitelist,
    current_beacon: Option<&BeaconMeta>,
    current_fence_id: Option<&str>,
) -> Result<MerchantPayload, VerifyError> {
    verify_token_at(
        raw,
        whitelist,
        current_beacon,
        current_fence_id,
        chrono::Utc::now().timestamp(),
    )
}

/// [`verify_token`] with an explicit clock, Unix seconds.
pub fn verify_token_at(
    raw: &str,
    whitelist: &Whitelist,
    current_beacon: Option<&BeaconMeta>,
    current_fence_id: Option<&str>,
    now_secs: i64,
) -> Result<MerchantPayload, VerifyError> {
    // 1. Parse.
    let (payload_part, sig_part) = raw
        .trim()
        .split_once('.')
        .ok_or_else(|| VerifyError::Parse("missing signature separator".into()))?;
    let payload_bytes = decode_part(payload_part, "payload")?;
    let signature = decode_part(sig_part, "signature")?;

    let value: Value = serde_json::from_slice(&payload_bytes)
        .map_err(|e| VerifyError::Parse(format!("payload is not JSON: {e}")))?;
    let payload: MerchantPayload = serde_json::from_value(value.clone())
        .map_err(|e| VerifyError::Parse(format!("payload fields: {e}")))?;

    // 2. Merchant key.
    let pem = whitelist
        .merchant_pubkey(&payload.merchant_id)
        .ok_or_else(|| VerifyError::UnknownMerchant(payload.merchant_id.clone()))?;
    let key = parse_verifying_key(pem).map_err(|_| {
        warn!(merchant = %payload.merchant_id, "whitelisted merchant key is unusable");
        VerifyError::UnknownMerchant(payload.merchant_id.clone())
    })?;

    // 3. Signature over the canonical form.
    let canonical = canonical_json(&value).map_err(|e| VerifyError::Parse(e.to_string()))?;
    verify_signature(&key, &canonical, &signature).map_err(|_| VerifyError::BadSignature)?;

    // 4. Beacon location. A beacon without a location matches nothing.
    if let Some(beacon) = current_beacon {
        let beacon_loc = beacon.location_id.as_deref();
        if !beacon_loc.is_some_and(|loc| payload.location_id.eq_ignore_ascii_case(loc)) {
            debug!(token = %payload.location_id, beacon = ?beacon_loc, "location mismatch");
            return Err(VerifyError::LocationMismatch);
        }
    }

    // 5. Geofence.
    if let Some(fence) = current_fence_id {
        if !payload.location_id.eq_ignore_ascii_case(fence) {
            debug!(token = %payload.location_id, fence, "fence mismatch");
            return Err(VerifyError::FenceMismatch);
        }
    }

    // 6. Beacon nonce. No beacon, or a beacon without a nonce, cannot vouch
    //    for freshness.
    let beacon_nonce = current_beacon.and_then(|b| b.nonce.as_deref());
    match (payload.nonce.as_deref(), beacon_nonce) {
        (Some(token_nonce), Some(beacon_nonce)) if token_nonce == beacon_nonce => {}
        _ => return Err(VerifyError::NonceMismatch),
    }

    // 7. Expiry.
    if payload.expiry < now_secs {
        return Err(VerifyError::Expired {
            expiry: payload.expiry,
            now: now_secs,
        });
    }

    debug!(merchant = %payload.merchant_id, location = %payload.location_id, "merchant token verified");
    Ok(payload)
}
