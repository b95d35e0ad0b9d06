//! Where prompts go once the gate decides to show one.
//!
//! The gate doesn't know about notification managers or UI lifecycles. It
//! talks to a [`PromptSink`], which the host implements on top of whatever
//! platform it runs on.

use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

use super::state::{PolicyDecision, ProximityState};
use super::GateError;

/// Which signal caused the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerReason {
    Wifi,
    Geofence,
    Beacon,
    Resume,
}

impl TriggerReason {
    /// User-facing notification text.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Wifi => "Connected to a trusted Wi-Fi network.",
            Self::Geofence => "Entered the store area.",
            Self::Beacon => "Verified store beacon detected.",
            Self::Resume => "Payment available.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wifi => "WIFI",
            Self::Geofence => "GEOFENCE",
            Self::Beacon => "BEACON",
            Self::Resume => "RESUME",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a UI needs to render the prompt and later request a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentPrompt {
    pub reason: TriggerReason,
    pub title: String,
    pub message: String,
    pub in_geofence: bool,
    pub near_beacon: bool,
    pub trusted_network: bool,
    pub fence_id: Option<String>,
    pub beacon_location: Option<String>,
}

impl PaymentPrompt {
    pub(crate) fn new(
        reason: TriggerReason,
        state: &ProximityState,
        decision: &PolicyDecision,
    ) -> Self {
        Self {
            reason,
            title: "Payment".to_string(),
            message: reason.message().to_string(),
            in_geofence: state.in_geofence,
            near_beacon: state.near_beacon,
            trusted_network: state.trusted_network,
            fence_id: decision.fence_location.clone(),
            beacon_location: decision.beacon_location.clone(),
        }
    }
}

/// Platform side of the gate.
///
/// Called with the gate's lock held. Implementations must be quick and must
/// not call back into the gate.
pub trait PromptSink: Send + Sync {
    /// Post (or replace) the payment notification. A missing notification
    /// permission is reported as [`GateError::PermissionUnavailable`]; the
    /// gate logs it and carries on.
    fn post_notification(&self, prompt: &PaymentPrompt) -> Result<(), GateError>;

    /// Withdraw the outstanding notification, if any. Idempotent.
    fn withdraw(&self);

    /// Whether the consuming UI is currently in the foreground.
    fn is_foreground(&self) -> bool;
}

#[derive(Debug, Default)]
struct MemorySinkInner {
    posted: Vec<PaymentPrompt>,
    withdrawals: usize,
    outstanding: bool,
}

/// In-memory sink that records everything it is asked to do.
///
/// Used by tests and by headless hosts that only care about the in-process
/// prompt channel.
#[derive(Debug)]
pub struct MemorySink {
    inner: Mutex<MemorySinkInner>,
    foreground: Mutex<bool>,
    permission: Mutex<bool>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MemorySink {
    pub fn new(foreground: bool) -> Self {
        Self {
            inner: Mutex::new(MemorySinkInner::default()),
            foreground: Mutex::new(foreground),
            permission: Mutex::new(true),
        }
    }

    pub fn set_foreground(&self, foreground: bool) {
        *self.foreground.lock() = foreground;
    }

    pub fn set_permission(&self, granted: bool) {
        *self.permission.lock() = granted;
    }

    /// Prompts that were actually posted.
    pub fn posted(&self) -> Vec<PaymentPrompt> {
        self.inner.lock().posted.clone()
    }

    pub fn posted_count(&self) -> usize {
        self.inner.lock().posted.len()
    }

    pub fn withdrawals(&self) -> usize {
        self.inner.lock().withdrawals
    }

    /// Whether a posted notification is still showing.
    pub fn has_outstanding(&self) -> bool {
        self.inner.lock().outstanding
    }
}

impl PromptSink for MemorySink {
    fn post_notification(&self, prompt: &PaymentPrompt) -> Result<(), GateError> {
        if !*self.permission.lock() {
            return Err(GateError::PermissionUnavailable("notifications".into()));
        }
        let mut inner = self.inner.lock();
        inner.posted.push(prompt.clone());
        inner.outstanding = true;
        Ok(())
    }

    fn withdraw(&self) {
        let mut inner = self.inner.lock();
        inner.withdrawals += 1;
        inner.outstanding = false;
    }

    fn is_foreground(&self) -> bool {
        *self.foreground.lock()
    }
}
