//! # Session Key Management
//!
//! Before the device can build a single QR token it needs a session: a key
//! id the server recognizes plus an AES key and a MAC key only the two of
//! us know. Getting one is a single round trip:
//!
//! ```text
//!   device                                         key server
//!     │  fresh P-256 key pair, 16-byte nonce            │
//!     │  POST /v1/keys/ecdh {client_pub, nonce, ...}    │
//!     ├────────────────────────────────────────────────►│
//!     │      {key_id, ttl_sec, server_pub, server_nonce}│
//!     │◄────────────────────────────────────────────────┤
//!     │  ECDH → HKDF(salt = nonces) → enc_key, mac_key  │
//!     │  persist {key_id, keys, expires_at_ms}          │
//! ```
//!
//! The session is reused until it expires. There is never a fallback: if
//! the exchange fails the caller gets an error, not a made-up session.

pub mod api;
pub mod error;
pub mod manager;
pub mod store;

pub use api::{EcdhRequest, EcdhResponse, HttpKeyApi, KeyApi, QrTokenRequest, QrTokenResponse};
pub use error::{SessionError, StoreError};
pub use manager::{now_ms, DeviceIdentity, Session, SessionConfig, SessionKeyManager};
pub use store::{MemorySessionStore, SessionRecord, SessionStore, SledSessionStore};
