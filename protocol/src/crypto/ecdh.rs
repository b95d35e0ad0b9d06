//! # Ephemeral P-256 Key Agreement
//!
//! Every session establishment generates a fresh P-256 key pair, sends the
//! public half to the key server and combines the private half with the
//! server's public key. The private scalar never leaves this module and is
//! consumed by the exchange, so it cannot be reused for a second session.
//!
//! ## Encodings
//!
//! - Our public key goes on the wire as an uncompressed SEC1 point
//!   (`0x04 || X || Y`, 65 bytes).
//! - The server's public key is accepted as SEC1 (compressed or
//!   uncompressed) or as an X.509 SubjectPublicKeyInfo DER blob, which is
//!   what JVM-based key servers emit by default.
//!
//! The shared secret is the raw 32-byte X coordinate of the ECDH point.
//! It is NOT a key; feed it to [`super::kdf::derive_session_keys`].

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::DecodePublicKey;
use p256::PublicKey;
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors in the key agreement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyExchangeError {
    #[error("key exchange failed: received invalid public key")]
    InvalidPublicKey,
}

/// Raw ECDH output. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecretBytes([u8; 32]);

impl SharedSecretBytes {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecretBytes(<redacted>)")
    }
}

/// One side of an ephemeral P-256 exchange.
///
/// ## Lifecycle
///
/// Create with [`EphemeralKeyPair::generate`], send
/// [`public_key_bytes`](Self::public_key_bytes) to the peer, then call
/// [`diffie_hellman`](Self::diffie_hellman) with the peer's key. That call
/// takes `self` by value: once the secret is spent, the compiler won't let
/// you touch it again.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public_key: PublicKey,
}

impl EphemeralKeyPair {
    /// Fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_key = secret.public_key();
        Self { secret, public_key }
    }

    /// Uncompressed SEC1 encoding of our public key (65 bytes).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Complete the exchange against the peer's encoded public key.
    pub fn diffie_hellman(self, peer_public: &[u8]) -> Result<SharedSecretBytes, KeyExchangeError> {
        let peer = parse_public_key(peer_public)?;
        let shared = self.secret.diffie_hellman(&peer);

        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(SharedSecretBytes(out))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &self.public_key_bytes().len())
            .finish_non_exhaustive()
    }
}

/// Parse a P-256 public key from SEC1 bytes, falling back to SPKI DER.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, KeyExchangeError> {
    PublicKey::from_sec1_bytes(bytes)
        .or_else(|_| PublicKey::from_public_key_der(bytes))
        .map_err(|_| KeyExchangeError::InvalidPublicKey)
}
