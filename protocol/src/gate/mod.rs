//! # Trigger Gate
//!
//! The single entry point for "should we show the payment prompt right now?"
//!
//! Three signal sources report in independently and whenever they like:
//!
//! ```text
//!   geofence transitions ──┐
//!   beacon advertisements ─┼──► TriggerGate ──► PromptSink (notification)
//!   network trust changes ─┘        │       └─► broadcast (foreground UI)
//!                                   ▼
//!                            ProximityState
//! ```
//!
//! The gate fuses them into one [`ProximityState`] behind one lock, applies a
//! [`PolicyMode`], and emits at most one prompt per cooldown window. Beacon
//! presence decays on its own: a whitelisted beacon that stops advertising
//! for [`BEACON_TIMEOUT`](crate::config::BEACON_TIMEOUT) is forgotten.
//!
//! ## Why an epoch counter
//!
//! The decay timer is a task that sleeps and then clears beacon state. A
//! fresh hit aborts the old task, but abort is racy: the old task may
//! already be waiting on the lock. Every hit bumps `beacon_epoch`, and a
//! timer only clears state if the epoch it was armed with is still current.
//!
//! ## Policy
//!
//! The field behaviour is [`PolicyMode::BeaconPresence`]: a whitelisted
//! beacon alone is enough. That is weaker than "in the store's geofence,
//! next to the store's beacon, or on the store's Wi-Fi", which is what
//! [`PolicyMode::Strict`] checks. Strict is opt-in because it changes who
//! sees the prompt.

pub mod frame;
pub mod network;
pub mod sink;
pub mod state;
pub mod trigger;

use thiserror::Error;

pub use frame::{BeaconFrame, FrameError};
pub use network::TrustedNetworks;
pub use sink::{MemorySink, PaymentPrompt, PromptSink, TriggerReason};
pub use state::{BeaconMeta, PolicyDecision, PolicyMode, ProximityState};
pub use trigger::{GateConfig, TriggerGate};

/// Errors at the gate's edges. Signal handlers themselves never fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// A platform permission the sink needs is missing.
    #[error("permission unavailable: {0}")]
    PermissionUnavailable(String),

    #[error("trigger gate must be created inside a Tokio runtime")]
    NoRuntime,
}
