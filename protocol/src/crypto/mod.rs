//! # Cryptographic Primitives for ProxPay
//!
//! Every session key, every QR token and every merchant signature check flows
//! through here. Boring, audited choices only:
//!
//! - **P-256 ECDH** for session key agreement with the key server.
//! - **HKDF-SHA256** to turn the shared secret into an encryption key and a
//!   MAC key.
//! - **AES-256-GCM** for token encryption, with the key id as AAD.
//! - **ECDSA P-256** for merchant-signed codes.
//! - **HMAC-SHA256** for server-minted tokens.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around RustCrypto
//! implementations. If you're tempted to optimize these functions, please
//! reconsider.

pub mod ecdh;
pub mod encryption;
pub mod kdf;
pub mod signatures;

pub use ecdh::{EphemeralKeyPair, KeyExchangeError, SharedSecretBytes};
pub use encryption::{open, seal, EncryptionError};
pub use kdf::{derive_session_keys, hmac_sha256, verify_hmac_sha256, KdfError, SessionKeyMaterial};
pub use signatures::{parse_verifying_key, sign_der, verify_signature, SignatureError};
