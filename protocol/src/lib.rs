// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ProxPay Protocol — Core Library
//!
//! Proximity-gated QR payments. A device only offers to pay when it is
//! provably inside a store: inside a registered geofence, next to a
//! whitelisted BLE beacon, or on the store's trusted Wi-Fi. When it pays it
//! shows a short-lived token encrypted under keys agreed with the key server.
//!
//! ## Architecture
//!
//! - **gate** — Proximity state machine. Decides when the payment prompt
//!   appears and when it must not.
//! - **session** — ECDH key agreement with the key server, single-flight
//!   refresh, persisted session record.
//! - **token** — Self-issued encrypted tokens, merchant-signed tokens, and
//!   server-minted HMAC tokens.
//! - **whitelist** — Beacon and merchant-key registry loaded from JSON.
//! - **crypto** — P-256 ECDH/ECDSA, HKDF, HMAC, AES-256-GCM.
//! - **config** — Protocol constants.
//!
//! ## Ground Rules
//!
//! 1. A check that fails means "no". Nothing is partially trusted.
//! 2. Key material never shows up in `Debug` output or logs.
//! 3. No `unsafe`.

pub mod config;
pub mod crypto;
pub mod gate;
pub mod session;
pub mod token;
pub mod whitelist;

pub use gate::{GateConfig, GateError, PolicyMode, TriggerGate};
pub use session::{SessionError, SessionKeyManager};
pub use token::{build_token, verify_token, TokenError, VerifyError};
pub use whitelist::Whitelist;
