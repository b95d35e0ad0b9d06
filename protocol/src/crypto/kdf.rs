//! # Session Key Derivation (HKDF-SHA256) and HMAC
//!
//! The raw P-256 shared secret is never used as a key. It goes through
//! HKDF-SHA256 (RFC 5869) with:
//!
//! ```text
//!   salt = client_nonce || server_nonce
//!   info = "qr-session-v1"
//!   L    = 64
//!
//!   PRK  = HMAC(salt, shared_secret)
//!   T(i) = HMAC(PRK, T(i-1) || info || i)      i = 1, 2
//!   OKM  = T(1) || T(2)
//! ```
//!
//! The first 32 bytes of OKM become the AES-256 key, the last 32 bytes the
//! HMAC-SHA256 key. Both nonces go into the salt so that neither side alone
//! can force a repeat of an earlier session's keys.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{AES_KEY_LENGTH, HKDF_INFO, MAC_KEY_LENGTH, SESSION_KEY_MATERIAL_LENGTH};

type HmacSha256 = Hmac<Sha256>;

/// Errors from key derivation and MAC computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KdfError {
    #[error("requested HKDF output length is invalid")]
    InvalidOutputLength,

    #[error("invalid MAC key")]
    InvalidMacKey,
}

/// The two symmetric keys of one session, fresh out of HKDF.
///
/// Zeroized on drop. `Debug` is deliberately redacted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyMaterial {
    enc_key: [u8; AES_KEY_LENGTH],
    mac_key: [u8; MAC_KEY_LENGTH],
}

impl SessionKeyMaterial {
    /// Rebuild key material from stored bytes.
    pub fn from_parts(enc_key: [u8; AES_KEY_LENGTH], mac_key: [u8; MAC_KEY_LENGTH]) -> Self {
        Self { enc_key, mac_key }
    }

    /// The AES-256-GCM key.
    pub fn enc_key(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.enc_key
    }

    /// The HMAC-SHA256 key.
    pub fn mac_key(&self) -> &[u8; MAC_KEY_LENGTH] {
        &self.mac_key
    }
}

impl std::fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeyMaterial(<redacted>)")
    }
}

/// HKDF-SHA256 extract-then-expand into `out`.
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), KdfError> {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, out)
        .map_err(|_| KdfError::InvalidOutputLength)
}

/// Derive the session encryption and MAC keys from an ECDH shared secret.
///
/// Deterministic: identical `(shared_secret, client_nonce, server_nonce)`
/// always yields identical keys.
pub fn derive_session_keys(
    shared_secret: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> Result<SessionKeyMaterial, KdfError> {
    let mut salt = Vec::with_capacity(client_nonce.len() + server_nonce.len());
    salt.extend_from_slice(client_nonce);
    salt.extend_from_slice(server_nonce);

    let mut okm = [0u8; SESSION_KEY_MATERIAL_LENGTH];
    hkdf_sha256(shared_secret, &salt, HKDF_INFO, &mut okm)?;

    let mut enc_key = [0u8; AES_KEY_LENGTH];
    let mut mac_key = [0u8; MAC_KEY_LENGTH];
    enc_key.copy_from_slice(&okm[..AES_KEY_LENGTH]);
    mac_key.copy_from_slice(&okm[AES_KEY_LENGTH..]);
    okm.zeroize();

    Ok(SessionKeyMaterial { enc_key, mac_key })
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], KdfError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| KdfError::InvalidMacKey)?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Constant-time HMAC-SHA256 tag check.
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Textbook RFC 5869 expand loop, written out with the HMAC primitive.
    fn reference_hkdf(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> Vec<u8> {
        let prk = hmac_sha256(salt, ikm).unwrap();
        let mut okm = Vec::with_capacity(len);
        let mut t: Vec<u8> = Vec::new();
        let mut counter: u8 = 1;
        while okm.len() < len {
            let mut block = t.clone();
            block.extend_from_slice(info);
            block.push(counter);
            t = hmac_sha256(&prk, &block).unwrap().to_vec();
            let take = (len - okm.len()).min(t.len());
            okm.extend_from_slice(&t[..take]);
            counter += 1;
        }
        okm
    }

    #[test]
    fn test_rfc5869_case_1() {
        let ikm = [0x0b; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();
        let mut okm = [0u8; 42];
        hkdf_sha256(&ikm, &salt, &info, &mut okm).unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn test_matches_manual_expand_loop() {
        let shared = [0x42u8; 32];
        let client_nonce = [0x01u8; 16];
        let server_nonce = [0x02u8; 16];

        let keys = derive_session_keys(&shared, &client_nonce, &server_nonce).unwrap();

        let mut salt = client_nonce.to_vec();
        salt.extend_from_slice(&server_nonce);
        let expected = reference_hkdf(&shared, &salt, HKDF_INFO, 64);

        assert_eq!(keys.enc_key().as_slice(), &expected[..32]);
        assert_eq!(keys.mac_key().as_slice(), &expected[32..]);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_session_keys(&[7u8; 32], &[1u8; 16], &[2u8; 16]).unwrap();
        let b = derive_session_keys(&[7u8; 32], &[1u8; 16], &[2u8; 16]).unwrap();
        assert_eq!(a.enc_key(), b.enc_key());
        assert_eq!(a.mac_key(), b.mac_key());
    }

    #[test]
    fn test_enc_and_mac_keys_differ() {
        let keys = derive_session_keys(&[7u8; 32], &[1u8; 16], &[2u8; 16]).unwrap();
        assert_ne!(keys.enc_key(), keys.mac_key());
    }

    #[test]
    fn test_single_byte_changes_avalanche() {
        let shared = [0x11u8; 32];
        let client = [0x22u8; 16];
        let server = [0x33u8; 16];
        let base = derive_session_keys(&shared, &client, &server).unwrap();

        let output = |k: &SessionKeyMaterial| {
            let mut v = k.enc_key().to_vec();
            v.extend_from_slice(k.mac_key());
            v
        };
        let base_out = output(&base);

        // Sample positions across all three inputs.
        for pos in [0usize, 7, 15, 31] {
            let mut s = shared;
            s[pos] ^= 0x01;
            let changed = output(&derive_session_keys(&s, &client, &server).unwrap());
            assert_ne!(changed, base_out);
            let differing = changed.iter().zip(&base_out).filter(|(a, b)| a != b).count();
            assert!(differing > 48, "weak avalanche: {differing}/64 bytes changed");
        }
        for pos in [0usize, 8, 15] {
            let mut c = client;
            c[pos] ^= 0x80;
            assert_ne!(output(&derive_session_keys(&shared, &c, &server).unwrap()), base_out);

            let mut s = server;
            s[pos] ^= 0x80;
            assert_ne!(output(&derive_session_keys(&shared, &client, &s).unwrap()), base_out);
        }
    }

    #[test]
    fn test_nonce_order_matters() {
        // Swapping client and server nonces must not collide.
        let a = derive_session_keys(&[9u8; 32], &[1u8; 16], &[2u8; 16]).unwrap();
        let b = derive_session_keys(&[9u8; 32], &[2u8; 16], &[1u8; 16]).unwrap();
        assert_ne!(a.enc_key(), b.enc_key());
    }

    #[test]
    fn test_hmac_verify() {
        let tag = hmac_sha256(b"key", b"token|123").unwrap();
        assert!(verify_hmac_sha256(b"key", b"token|123", &tag));
        assert!(!verify_hmac_sha256(b"key", b"token|124", &tag));
        assert!(!verify_hmac_sha256(b"kez", b"token|123", &tag));
        assert!(!verify_hmac_sha256(b"key", b"token|123", &tag[..31]));
    }

    #[test]
    fn test_debug_is_redacted() {
        let keys = SessionKeyMaterial::from_parts([0xAB; 32], [0xCD; 32]);
        let shown = format!("{keys:?}");
        assert!(!shown.contains("171"));
        assert!(shown.contains("redacted"));
    }
}
