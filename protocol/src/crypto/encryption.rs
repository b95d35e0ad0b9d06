//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for ProxPay tokens. Every self-issued QR token is
//! one AES-256-GCM ciphertext whose additional authenticated data (AAD) is
//! the session key id.
//!
//! ## Nonce management
//!
//! GCM is notoriously unforgiving about nonce reuse. If you encrypt two
//! different messages with the same key and nonce, an attacker can recover
//! the XOR of the plaintexts AND forge authentication tags. Game over.
//!
//! Our strategy: random 96-bit nonces from the OS CSPRNG, one per token.
//! Sessions expire long before the ~2^48 birthday bound is within sight.
//!
//! ## Wire format
//!
//! [`seal`] returns `nonce || ciphertext || tag` as a single `Vec<u8>`.
//! [`open`] expects exactly that layout back.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// We intentionally keep these vague. The difference between "wrong key",
/// "wrong AAD" and "corrupted ciphertext" is none of an attacker's business.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key, wrong context or corrupted ciphertext")]
    DecryptFailed,

    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("ciphertext too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// Turn a caller-supplied key slice into a fixed-size AES-256 key reference.
///
/// Keys arrive as slices from storage and FFI boundaries; this is the one
/// place where their length is checked.
pub fn key_from_slice(key: &[u8]) -> Result<&[u8; AES_KEY_LENGTH], EncryptionError> {
    key.try_into()
        .map_err(|_| EncryptionError::InvalidKeyLength(key.len()))
}

/// Encrypt with Additional Authenticated Data under a fresh random nonce.
///
/// Returns `(nonce, ciphertext)` where the ciphertext carries the 16-byte
/// GCM tag at its end. The AAD is authenticated but NOT encrypted; the
/// caller must present the same AAD at decryption time.
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; AES_NONCE_LENGTH], Vec<u8>), EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt ciphertext that was encrypted with AAD.
///
/// The nonce and AAD must match the values used during encryption, or
/// decryption fails with an authentication error. No plaintext is ever
/// returned for a ciphertext that fails authentication.
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptFailed)
}

/// Encrypt and pack as `nonce || ciphertext || tag`.
pub fn seal(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let (nonce, ciphertext) = encrypt_with_aad(key, plaintext, aad)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Split a sealed buffer produced by [`seal`] and decrypt it.
pub fn open(
    key: &[u8; AES_KEY_LENGTH],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if sealed.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(AES_NONCE_LENGTH);
    let nonce: &[u8; AES_NONCE_LENGTH] = nonce_bytes
        .try_into()
        .map_err(|_| EncryptionError::CiphertextTooShort)?;

    decrypt_with_aad(key, nonce, ciphertext, aad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        // A fixed key for testing. Never use a predictable key in production.
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let sealed = seal(&key, b"pay 4500 KRW at store a", b"kid-1").unwrap();
        let recovered = open(&key, &sealed, b"kid-1").unwrap();
        assert_eq!(recovered, b"pay 4500 KRW at store a");
    }

    #[test]
    fn test_sealed_length() {
        // nonce (12) + plaintext + tag (16)
        let key = test_key();
        let plaintext = b"exactly 26 bytes of input!";
        let sealed = seal(&key, plaintext, b"").unwrap();
        assert_eq!(
            sealed.len(),
            AES_NONCE_LENGTH + plaintext.len() + AES_TAG_LENGTH
        );
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let sealed = seal(&key, b"secret", b"kid-1").unwrap();
        assert_eq!(
            open(&key, &sealed, b"kid-2"),
            Err(EncryptionError::DecryptFailed)
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = test_key();
        let sealed = seal(&key, b"secret", b"kid").unwrap();

        let mut wrong_key = test_key();
        wrong_key[0] ^= 0xFF;
        assert!(open(&wrong_key, &sealed, b"kid").is_err());
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let key = test_key();
        let sealed = seal(&key, b"{\"v\":1}", b"kid").unwrap();

        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    open(&key, &tampered, b"kid").is_err(),
                    "flip at byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn test_unique_nonces() {
        let key = test_key();
        let a = seal(&key, b"message", b"").unwrap();
        let b = seal(&key, b"message", b"").unwrap();
        assert_ne!(&a[..AES_NONCE_LENGTH], &b[..AES_NONCE_LENGTH]);
    }

    #[test]
    fn test_open_too_short() {
        let key = test_key();
        assert_eq!(
            open(&key, &[0u8; 20], b""),
            Err(EncryptionError::CiphertextTooShort)
        );
    }

    #[test]
    fn test_key_from_slice_rejects_short_key() {
        assert_eq!(
            key_from_slice(&[0u8; 16]),
            Err(EncryptionError::InvalidKeyLength(16))
        );
        assert!(key_from_slice(&test_key()).is_ok());
    }

    #[test]
    fn test_detached_aad_roundtrip() {
        let key = test_key();
        let (nonce, ct) = encrypt_with_aad(&key, b"data", b"aad").unwrap();
        assert_eq!(decrypt_with_aad(&key, &nonce, &ct, b"aad").unwrap(), b"data");
        assert!(decrypt_with_aad(&key, &nonce, &ct, b"aae").is_err());
    }
}
