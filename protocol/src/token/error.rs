//! Error types for the token codec.

use thiserror::Error;

use crate::config::AES_KEY_LENGTH;

/// Errors building or opening self-issued tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Caller bug: the encryption key is not an AES-256 key.
    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// An extra field tried to overwrite a payload field.
    #[error("extra field `{0}` collides with a reserved payload field")]
    ReservedField(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token encryption failed")]
    EncryptFailed,

    /// Wrong key, wrong key id or tampered ciphertext. We don't say which.
    #[error("token decryption failed")]
    DecryptFailed,

    #[error("token failed integrity check")]
    IntegrityCheckFailed,
}

/// Why a merchant-presented token was rejected.
///
/// Every variant means the same thing to the caller: do not trust the
/// payload. The variants exist for logs and for the "not verified" message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("token could not be parsed: {0}")]
    Parse(String),

    #[error("unknown merchant: {0}")]
    UnknownMerchant(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("token location does not match the nearby beacon")]
    LocationMismatch,

    #[error("token location does not match the current geofence")]
    FenceMismatch,

    #[error("token nonce does not match the nearby beacon")]
    NonceMismatch,

    #[error("token expired at {expiry} (now {now})")]
    Expired { expiry: i64, now: i64 },
}
