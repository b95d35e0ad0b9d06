//! # Secure Token Codec
//!
//! Three token shapes pass through a ProxPay device:
//!
//! - **Self-issued** ([`builder`]): the device encrypts a small JSON payload
//!   under the session key and shows it as a QR code. AES-256-GCM, key id
//!   as AAD.
//! - **Merchant-signed** ([`verify`]): the store shows a code, the device
//!   scans it and checks the ECDSA signature plus the proximity context.
//! - **Server-minted** ([`issued`]): the key server hands out an opaque token
//!   with an HMAC the device checks with its session MAC key.
//!
//! None of them is ever partially trusted. Any failed check means "not
//! verified", full stop.

pub mod builder;
pub mod error;
pub mod issued;
pub mod verify;

pub use builder::{build_token, open_token, parse_token, seal_payload, ParsedToken, TokenPayload};
pub use error::{TokenError, VerifyError};
pub use issued::{issued_token_mac, verify_issued_token};
pub use verify::{sign_merchant_payload, verify_token, verify_token_at, MerchantPayload};
