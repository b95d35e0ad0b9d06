//! Fused proximity state and the allow/deny policy over it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A whitelisted beacon the device is currently near.
///
/// Immutable once built. A fresh advertisement replaces it wholesale, the
/// decay timer clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconMeta {
    pub region_id: String,
    pub major: u16,
    pub minor: u16,
    pub location_id: Option<String>,
    pub merchant_id: Option<String>,
    /// Rotating nonce the beacon advertised alongside its identifiers, if any.
    pub nonce: Option<String>,
    pub rssi: i16,
}

/// Everything the gate knows about where the device is.
///
/// `near_beacon` and `current_beacon` always move together: the gate never
/// releases its lock with one set and the other clear.
#[derive(Debug, Clone, Default)]
pub struct ProximityState {
    pub in_geofence: bool,
    /// Lowercased id of the fence behind the most recent transition.
    pub last_fence_id: Option<String>,
    pub near_beacon: bool,
    pub current_beacon: Option<BeaconMeta>,
    pub trusted_network: bool,
    /// Monotonic time of the last emitted prompt. `None` until the first one.
    pub last_shown_at: Option<Instant>,
    /// Generation of the current "near" assertion. Bumped on every beacon
    /// hit or miss; a decay timer armed for an older generation is a no-op.
    pub beacon_epoch: u64,
}

/// Which evidence is enough to surface a payment prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Allow whenever a whitelisted beacon is near, regardless of geofence
    /// or network state. This is the behaviour shipped in the field.
    #[default]
    BeaconPresence,

    /// `(in_geofence AND near_beacon AND beacon location == fence) OR
    /// trusted_network`.
    Strict,
}

impl FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beacon" | "beacon_presence" | "beacon-presence" => Ok(Self::BeaconPresence),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown policy mode: {other}")),
        }
    }
}

/// Outcome of a policy evaluation, with the locations that went into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allow: bool,
    /// Lowercased location of the current beacon.
    pub beacon_location: Option<String>,
    /// Lowercased id of the last fence.
    pub fence_location: Option<String>,
}

impl PolicyDecision {
    /// Both locations are known and identical.
    pub fn locations_match(&self) -> bool {
        matches!(
            (&self.beacon_location, &self.fence_location),
            (Some(b), Some(f)) if b == f
        )
    }
}

impl ProximityState {
    /// Pure policy evaluation over this snapshot.
    pub fn evaluate(&self, mode: PolicyMode) -> PolicyDecision {
        let mut decision = PolicyDecision {
            allow: false,
            beacon_location: self
                .current_beacon
                .as_ref()
                .and_then(|b| b.location_id.as_deref())
                .map(str::to_lowercase),
            fence_location: self.last_fence_id.as_deref().map(str::to_lowercase),
        };

        decision.allow = match mode {
            PolicyMode::BeaconPresence => self.near_beacon,
            PolicyMode::Strict => {
                (self.in_geofence && self.near_beacon && decision.locations_match())
                    || self.trusted_network
            }
        };
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon_at(location: &str) -> BeaconMeta {
        BeaconMeta {
            region_id: "74278BDA-B644-4520-8F0C-720EAF059935".into(),
            major: 1,
            minor: 1,
            location_id: Some(location.into()),
            merchant_id: Some("m-001".into()),
            nonce: Some("n1".into()),
            rssi: -60,
        }
    }

    fn state(geo: Option<&str>, beacon: Option<&str>, wifi: bool) -> ProximityState {
        ProximityState {
            in_geofence: geo.is_some(),
            last_fence_id: geo.map(str::to_string),
            near_beacon: beacon.is_some(),
            current_beacon: beacon.map(beacon_at),
            trusted_network: wifi,
            ..Default::default()
        }
    }

    #[test]
    fn test_beacon_presence_only_looks_at_beacon() {
        let mode = PolicyMode::BeaconPresence;
        assert!(state(None, Some("store_a"), false).evaluate(mode).allow);
        assert!(state(Some("store_b"), Some("store_a"), false).evaluate(mode).allow);
        assert!(!state(Some("store_a"), None, true).evaluate(mode).allow);
    }

    #[test]
    fn test_strict_requires_matching_locations() {
        let mode = PolicyMode::Strict;
        assert!(state(Some("store_a"), Some("STORE_A"), false).evaluate(mode).allow);
        assert!(!state(Some("store_a"), Some("store_b"), false).evaluate(mode).allow);
        assert!(!state(None, Some("store_a"), false).evaluate(mode).allow);
    }

    #[test]
    fn test_strict_trusted_network_alone_suffices() {
        assert!(state(None, None, true).evaluate(PolicyMode::Strict).allow);
    }

    #[test]
    fn test_decision_locations_are_lowercased() {
        let d = state(Some("Store_A"), Some("STORE_A"), false).evaluate(PolicyMode::Strict);
        assert_eq!(d.beacon_location.as_deref(), Some("store_a"));
        assert_eq!(d.fence_location.as_deref(), Some("store_a"));
        assert!(d.locations_match());
    }

    #[test]
    fn test_empty_state_denies_everywhere() {
        let s = ProximityState::default();
        assert!(!s.evaluate(PolicyMode::BeaconPresence).allow);
        assert!(!s.evaluate(PolicyMode::Strict).allow);
    }

    #[test]
    fn test_policy_mode_from_str() {
        assert_eq!("strict".parse::<PolicyMode>(), Ok(PolicyMode::Strict));
        assert_eq!("Beacon".parse::<PolicyMode>(), Ok(PolicyMode::BeaconPresence));
        assert!("lenient".parse::<PolicyMode>().is_err());
    }
}
