//! # Merchant Signatures (ECDSA P-256 / SHA-256)
//!
//! Merchant-presented QR codes are signed with ECDSA over P-256. The device
//! holds each merchant's public key (PEM, from the beacon whitelist) and
//! checks the signature before trusting a single byte of the payload.
//!
//! ## Signature encodings
//!
//! Merchant backends disagree on how to serialize an ECDSA signature. JVM
//! and OpenSSL emit ASN.1 DER (`SEQUENCE { r INTEGER, s INTEGER }`), WebCrypto
//! emits the fixed-width `r || s` form (64 bytes). We accept both: a 64-byte
//! blob is tried as fixed-width first, everything else is parsed as DER.
//!
//! ## Key encodings
//!
//! Public keys are accepted as SPKI PEM (`-----BEGIN PUBLIC KEY-----`), as
//! the bare base64 body of such a PEM, or as base64 of a SEC1 point.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use thiserror::Error;

/// Errors during signature operations.
///
/// Intentionally vague. We don't tell attackers why verification failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature encoding")]
    InvalidSignatureBytes,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Parse a merchant public key from PEM, bare base64 SPKI or base64 SEC1.
pub fn parse_verifying_key(encoded: &str) -> Result<VerifyingKey, SignatureError> {
    let trimmed = encoded.trim();
    if trimmed.starts_with("-----BEGIN") {
        return VerifyingKey::from_public_key_pem(trimmed)
            .map_err(|_| SignatureError::InvalidPublicKey);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact)
        .map_err(|_| SignatureError::InvalidPublicKey)?;

    VerifyingKey::from_public_key_der(&der)
        .or_else(|_| VerifyingKey::from_sec1_bytes(&der))
        .map_err(|_| SignatureError::InvalidPublicKey)
}

/// Decode a signature in either fixed-width or DER form.
pub fn decode_signature(bytes: &[u8]) -> Result<Signature, SignatureError> {
    if bytes.len() == 64 {
        if let Ok(sig) = Signature::from_slice(bytes) {
            return Ok(sig);
        }
    }
    Signature::from_der(bytes).map_err(|_| SignatureError::InvalidSignatureBytes)
}

/// Verify an ECDSA P-256 signature over `message`.
///
/// Returns `Ok(())` only for a well-formed signature that matches. Garbage
/// signature bytes and honest mismatches both come back as errors, but not
/// the same one, so callers can tell a malformed token from a forged one.
pub fn verify_signature(
    key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    let sig = decode_signature(signature)?;
    key.verify(message, &sig)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Sign `message`, DER-encoded. Merchant-side counterpart of [`verify_signature`].
pub fn sign_der(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let sig: Signature = key.sign(message);
    sig.to_der().as_bytes().to_vec()
}
