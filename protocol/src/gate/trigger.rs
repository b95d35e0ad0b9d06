//! The trigger gate: signal handlers, decay timer and debounced emission.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::sink::{PaymentPrompt, PromptSink, TriggerReason};
use super::state::{BeaconMeta, PolicyDecision, PolicyMode, ProximityState};
use super::GateError;
use crate::config::{BEACON_TIMEOUT, PROMPT_CHANNEL_CAPACITY, PROMPT_COOLDOWN};
use crate::whitelist::Whitelist;

/// Tunables for one gate instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// How long a beacon hit keeps `near_beacon` asserted.
    pub beacon_timeout: Duration,
    /// Minimum spacing between two emitted prompts.
    pub cooldown: Duration,
    pub policy: PolicyMode,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            beacon_timeout: BEACON_TIMEOUT,
            cooldown: PROMPT_COOLDOWN,
            policy: PolicyMode::default(),
        }
    }
}

struct Inner {
    state: ProximityState,
    decay_task: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    whitelist: Arc<Whitelist>,
    sink: Arc<dyn PromptSink>,
    config: GateConfig,
    prompts: broadcast::Sender<PaymentPrompt>,
    runtime: Handle,
}

/// Fuses geofence, beacon and network signals into one prompt decision.
///
/// All handlers serialize through one lock and never fail: problems are
/// logged and the gate degrades to "no prompt". Share it behind an `Arc`.
/// Dropping the gate cancels the beacon decay timer.
pub struct TriggerGate {
    shared: Arc<Shared>,
}

impl TriggerGate {
    /// Create a gate. Must be called from inside a Tokio runtime, which will
    /// host the beacon decay timer.
    pub fn new(
        config: GateConfig,
        whitelist: Arc<Whitelist>,
        sink: Arc<dyn PromptSink>,
    ) -> Result<Self, GateError> {
        let runtime = Handle::try_current().map_err(|_| GateError::NoRuntime)?;
        let (prompts, _) = broadcast::channel(PROMPT_CHANNEL_CAPACITY);

        info!(
            policy = ?config.policy,
            beacon_timeout_ms = config.beacon_timeout.as_millis() as u64,
            cooldown_ms = config.cooldown.as_millis() as u64,
            "trigger gate started"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ProximityState::default(),
                    decay_task: None,
                }),
                whitelist,
                sink,
                config,
                prompts,
                runtime,
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Signal handlers
    // -----------------------------------------------------------------------

    /// Geofence transition. `fence_id` is stored lowercased.
    pub fn on_geofence_changed(&self, in_zone: bool, fence_id: Option<&str>) {
        let mut inner = self.shared.inner.lock();
        inner.state.in_geofence = in_zone;
        inner.state.last_fence_id = fence_id.map(str::to_lowercase);

        debug!(
            in_zone,
            fence = ?inner.state.last_fence_id,
            near_beacon = inner.state.near_beacon,
            trusted_network = inner.state.trusted_network,
            "geofence changed"
        );

        if !in_zone {
            self.shared.sink.withdraw();
        }
        self.shared.maybe_emit(&mut inner, TriggerReason::Geofence);
    }

    /// One beacon advertisement. Whitelisted beacons assert `near_beacon`
    /// for the configured timeout; anything else clears it immediately.
    pub fn on_beacon_frame(
        &self,
        region_id: &str,
        major: u16,
        minor: u16,
        nonce: Option<String>,
        rssi: i16,
    ) {
        let entry = self.shared.whitelist.find_beacon(region_id, major, minor);

        let mut inner = self.shared.inner.lock();
        inner.state.beacon_epoch = inner.state.beacon_epoch.wrapping_add(1);
        if let Some(task) = inner.decay_task.take() {
            task.abort();
        }

        match entry {
            Some(entry) => {
                let meta = BeaconMeta {
                    region_id: region_id.to_string(),
                    major,
                    minor,
                    location_id: entry.location_id.clone(),
                    merchant_id: entry.merchant_id.clone(),
                    nonce,
                    rssi,
                };
                debug!(
                    region = region_id,
                    major,
                    minor,
                    rssi,
                    location = ?meta.location_id,
                    fence = ?inner.state.last_fence_id,
                    "beacon hit"
                );
                inner.state.current_beacon = Some(meta);
                inner.state.near_beacon = true;
                let epoch = inner.state.beacon_epoch;
                inner.decay_task = Some(Shared::arm_decay(&self.shared, epoch));
            }
            None => {
                debug!(region = region_id, major, minor, rssi, "beacon not whitelisted");
                inner.state.current_beacon = None;
                inner.state.near_beacon = false;
                self.shared.sink.withdraw();
            }
        }

        self.shared.maybe_emit(&mut inner, TriggerReason::Beacon);
    }

    /// Network trust changed.
    pub fn on_trusted_network_changed(&self, ok: bool) {
        let mut inner = self.shared.inner.lock();
        inner.state.trusted_network = ok;
        debug!(trusted = ok, "trusted network changed");

        if ok {
            self.shared.maybe_emit(&mut inner, TriggerReason::Wifi);
        } else {
            self.shared.sink.withdraw();
        }
    }

    /// The consuming UI came back; re-run the policy without touching state.
    pub fn on_app_foregrounded(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.maybe_emit(&mut inner, TriggerReason::Resume);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn evaluate_policy(&self) -> PolicyDecision {
        self.shared.inner.lock().state.evaluate(self.shared.config.policy)
    }

    /// Gate for the "scan an externally presented code" flow.
    pub fn allowed_for_scan(&self) -> bool {
        self.evaluate_policy().allow
    }

    /// Consistent copy of the whole proximity state.
    pub fn snapshot(&self) -> ProximityState {
        self.shared.inner.lock().state.clone()
    }

    pub fn current_beacon(&self) -> Option<BeaconMeta> {
        self.shared.inner.lock().state.current_beacon.clone()
    }

    pub fn last_fence_id(&self) -> Option<String> {
        self.shared.inner.lock().state.last_fence_id.clone()
    }

    pub fn config(&self) -> &GateConfig {
        &self.shared.config
    }

    /// In-process prompt events, delivered only while the UI is in the
    /// foreground.
    pub fn subscribe(&self) -> broadcast::Receiver<PaymentPrompt> {
        self.shared.prompts.subscribe()
    }

    /// Cancel the beacon decay timer. Beacon state stays as it is.
    pub fn shutdown(&self) {
        if let Some(task) = self.shared.inner.lock().decay_task.take() {
            task.abort();
            debug!("beacon decay timer cancelled");
        }
    }
}

impl Drop for TriggerGate {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn arm_decay(shared: &Arc<Self>, epoch: u64) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(shared);
        let timeout = shared.config.beacon_timeout;
        shared.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire_beacon(epoch);
            }
        })
    }

    fn expire_beacon(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.state.beacon_epoch != epoch {
            trace!(epoch, current = inner.state.beacon_epoch, "stale beacon timer");
            return;
        }
        inner.state.near_beacon = false;
        inner.state.current_beacon = None;
        inner.decay_task = None;
        self.sink.withdraw();
        info!("beacon near timeout, near_beacon cleared");
    }

    /// Debounced, policy-checked prompt emission. Caller holds the lock.
    fn maybe_emit(&self, inner: &mut Inner, reason: TriggerReason) {
        let now = Instant::now();
        let state = &mut inner.state;

        if let Some(last) = state.last_shown_at {
            if now.duration_since(last) <= self.config.cooldown {
                trace!(%reason, "prompt suppressed by cooldown");
                return;
            }
        }

        let decision = state.evaluate(self.config.policy);
        if !decision.allow {
            debug!(
                %reason,
                geo = state.in_geofence,
                beacon = state.near_beacon,
                wifi = state.trusted_network,
                beacon_loc = ?decision.beacon_location,
                fence_loc = ?decision.fence_location,
                loc_match = decision.locations_match(),
                "prompt blocked by policy"
            );
            return;
        }

        state.last_shown_at = Some(now);
        let prompt = PaymentPrompt::new(reason, state, &decision);

        match self.sink.post_notification(&prompt) {
            Ok(()) => info!(%reason, fence = ?prompt.fence_id, "payment prompt posted"),
            Err(e) => warn!(%reason, error = %e, "payment notification skipped"),
        }

        if self.sink.is_foreground() {
            // No subscribers is fine; the notification already went out.
            let _ = self.prompts.send(prompt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::sink::MemorySink;
    use crate::whitelist::WhitelistEntry;

    const REGION: &str = "74278BDA-B644-4520-8F0C-720EAF059935";

    fn whitelist() -> Arc<Whitelist> {
        Arc::new(Whitelist::from_entries([
            WhitelistEntry {
                region_id: REGION.into(),
                major: 1,
                minor: 1,
                location_id: Some("store_duksung_a".into()),
                merchant_id: Some("m-001".into()),
                merchant_pubkey_pem: None,
            },
            WhitelistEntry {
                region_id: REGION.into(),
                major: 1,
                minor: 2,
                location_id: Some("store_duksung_b".into()),
                merchant_id: Some("m-002".into()),
                merchant_pubkey_pem: None,
            },
        ]))
    }

    fn gate_with(policy: PolicyMode) -> (TriggerGate, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new(true));
        let config = GateConfig {
            policy,
            ..GateConfig::default()
        };
        let gate = TriggerGate::new(config, whitelist(), sink.clone()).unwrap();
        (gate, sink)
    }

    fn hit(gate: &TriggerGate) {
        gate.on_beacon_frame(REGION, 1, 1, Some("nonce-1".into()), -60);
    }

    #[test]
    fn test_new_requires_runtime() {
        let sink = Arc::new(MemorySink::default());
        assert!(matches!(
            TriggerGate::new(GateConfig::default(), whitelist(), sink),
            Err(GateError::NoRuntime)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_beacon_hit_sets_state_and_prompts() {
        let (gate, sink) = gate_with(PolicyMode::BeaconPresence);
        hit(&gate);

        let snap = gate.snapshot();
        assert!(snap.near_beacon);
        let beacon = snap.current_beacon.unwrap();
        assert_eq!(beacon.location_id.as_deref(), Some("store_duksung_a"));
        assert_eq!(beacon.nonce.as_deref(), Some("nonce-1"));
        assert_eq!(sink.posted_count(), 1);
        assert_eq!(sink.posted()[0].reason, TriggerReason::Beacon);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_beacon_clears_and_withdraws() {
        let (gate, sink) = gate_with(PolicyMode::BeaconPresence);
        hit(&gate);
        gate.on_beacon_frame(REGION, 9, 9, None, -50);

        let snap = gate.snapshot();
        assert!(!snap.near_beacon);
        assert!(snap.current_beacon.is_none());
        assert!(!sink.has_outstanding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_beacon_survives_refreshes_inside_timeout() {
        let (gate, _sink) = gate_with(PolicyMode::BeaconPresence);
        hit(&gate);
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(14)).await;
            assert!(gate.snapshot().near_beacon);
            hit(&gate);
        }
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(gate.snapshot().near_beacon);
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_beacon_decays_after_timeout() {
        let (gate, sink) = gate_with(PolicyMode::BeaconPresence);
        hit(&gate);

        tokio::time::sleep(Duration::from_secs(16)).await;
        let snap = gate.snapshot();
        assert!(!snap.near_beacon);
        assert!(snap.current_beacon.is_none());
        assert!(!sink.has_outstanding());

        // Stays false with no new hit.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!gate.snapshot().near_beacon);

        hit(&gate);
        assert!(gate.snapshot().near_beacon);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_clear_fresh_hit() {
        let (gate, _sink) = gate_with(PolicyMode::BeaconPresence);
        hit(&gate);
        let first_epoch = gate.snapshot().beacon_epoch;

        tokio::time::sleep(Duration::from_secs(10)).await;
        hit(&gate);

        // Fire the first timer by hand, as if abort had lost the race.
        gate.shared.expire_beacon(first_epoch);
        assert!(gate.snapshot().near_beacon);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_limits_prompts() {
        let (gate, sink) = gate_with(PolicyMode::BeaconPresence);
        hit(&gate);
        for _ in 0..10 {
            hit(&gate);
            gate.on_app_foregrounded();
            gate.on_trusted_network_changed(true);
        }
        assert_eq!(sink.posted_count(), 1);

        // Exactly at the cooldown boundary still counts as inside it.
        tokio::time::advance(Duration::from_secs(3)).await;
        gate.on_app_foregrounded();
        assert_eq!(sink.posted_count(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        gate.on_app_foregrounded();
        assert_eq!(sink.posted_count(), 2);
        assert_eq!(sink.posted()[1].reason, TriggerReason::Resume);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_emission_does_not_start_cooldown() {
        let (gate, sink) = gate_with(PolicyMode::BeaconPresence);
        gate.on_geofence_changed(true, Some("store_duksung_a"));
        assert_eq!(sink.posted_count(), 0);
        assert!(gate.snapshot().last_shown_at.is_none());

        hit(&gate);
        assert_eq!(sink.posted_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_geofence_exit_withdraws() {
        let (gate, sink) = gate_with(PolicyMode::Strict);
        gate.on_geofence_changed(true, Some("STORE_DUKSUNG_A"));
        hit(&gate);
        assert_eq!(sink.posted_count(), 1);
        assert_eq!(gate.last_fence_id().as_deref(), Some("store_duksung_a"));

        gate.on_geofence_changed(false, Some("store_duksung_a"));
        assert!(!sink.has_outstanding());
        assert!(!gate.allowed_for_scan());
    }

    #[tokio::test(start_paused = true)]
    async fn test_untrusted_network_withdraws() {
        let (gate, sink) = gate_with(PolicyMode::Strict);
        gate.on_trusted_network_changed(true);
        assert_eq!(sink.posted_count(), 1);
        assert_eq!(sink.posted()[0].reason, TriggerReason::Wifi);

        gate.on_trusted_network_changed(false);
        assert!(!sink.has_outstanding());
        assert!(!gate.allowed_for_scan());
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_policy_location_mismatch_denies() {
        let (gate, sink) = gate_with(PolicyMode::Strict);
        gate.on_geofence_changed(true, Some("store_duksung_a"));
        gate.on_beacon_frame(REGION, 1, 2, None, -60);

        let decision = gate.evaluate_policy();
        assert!(!decision.allow);
        assert_eq!(decision.beacon_location.as_deref(), Some("store_duksung_b"));
        assert_eq!(sink.posted_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_missing_is_not_fatal() {
        let (gate, sink) = gate_with(PolicyMode::BeaconPresence);
        sink.set_permission(false);
        let mut rx = gate.subscribe();

        hit(&gate);
        assert_eq!(sink.posted_count(), 0);
        // Foreground delivery still happens.
        let prompt = rx.try_recv().unwrap();
        assert_eq!(prompt.reason, TriggerReason::Beacon);
        // And the cooldown was consumed.
        assert!(gate.snapshot().last_shown_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_ui_gets_no_event() {
        let (gate, sink) = gate_with(PolicyMode::BeaconPresence);
        sink.set_foreground(false);
        let mut rx = gate.subscribe();

        hit(&gate);
        assert_eq!(sink.posted_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_decay() {
        let (gate, _sink) = gate_with(PolicyMode::BeaconPresence);
        hit(&gate);
        gate.shutdown();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(gate.snapshot().near_beacon);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invariant_near_implies_beacon() {
        let (gate, _sink) = gate_with(PolicyMode::BeaconPresence);
        let check = |g: &TriggerGate| {
            let s = g.snapshot();
            assert_eq!(s.near_beacon, s.current_beacon.is_some());
        };
        check(&gate);
        hit(&gate);
        check(&gate);
        gate.on_beacon_frame(REGION, 5, 5, None, -80);
        check(&gate);
        hit(&gate);
        tokio::time::sleep(Duration::from_secs(20)).await;
        check(&gate);
    }
}
