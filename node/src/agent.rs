//! # Device Agent
//!
//! Feeds proximity events into the trigger gate and turns gate prompts into
//! payment tokens.
//!
//! Events arrive as one JSON object per line, tagged by `type`:
//!
//! ```text
//! {"type":"geofence","in_zone":true,"fence_id":"store_duksung_a"}
//! {"type":"beacon","uuid":"74278BDA-...","major":1,"minor":1,"nonce":"n1","rssi":-58}
//! {"type":"advertisement","company_id":76,"data_hex":"0215...","rssi":-58}
//! {"type":"wifi","ssid":"\"StoreWiFi\"","bssid":"AA:BB:CC:DD:EE:FF"}
//! {"type":"foreground"}
//! {"type":"scan","code":"<merchant code>"}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use proxpay_protocol::gate::frame::is_near;
use proxpay_protocol::gate::{
    BeaconFrame, GateError, PaymentPrompt, PromptSink, TriggerGate, TrustedNetworks,
};
use proxpay_protocol::session::{SessionError, SessionKeyManager};
use proxpay_protocol::token::{seal_payload, verify_token, TokenPayload};
use proxpay_protocol::whitelist::Whitelist;

use crate::render;

/// One line of agent input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProximityEvent {
    Geofence {
        in_zone: bool,
        #[serde(default)]
        fence_id: Option<String>,
    },
    /// Already-decoded beacon identity.
    Beacon {
        uuid: String,
        major: u16,
        minor: u16,
        #[serde(default)]
        nonce: Option<String>,
        rssi: i16,
    },
    /// Raw manufacturer data from a BLE scan.
    Advertisement {
        company_id: u16,
        data_hex: String,
        #[serde(default)]
        nonce: Option<String>,
        rssi: i16,
    },
    Wifi {
        #[serde(default)]
        ssid: Option<String>,
        #[serde(default)]
        bssid: Option<String>,
    },
    Foreground,
    Scan {
        code: String,
    },
}

/// Prompt sink for a headless agent: logs the prompt, and the QR printed by
/// [`serve_prompts`] is the "notification".
#[derive(Debug, Default)]
pub struct LoggingSink {
    outstanding: AtomicBool,
}

impl PromptSink for LoggingSink {
    fn post_notification(&self, prompt: &PaymentPrompt) -> Result<(), GateError> {
        self.outstanding.store(true, Ordering::SeqCst);
        info!(
            reason = %prompt.reason,
            fence = ?prompt.fence_id,
            beacon_location = ?prompt.beacon_location,
            "{}",
            prompt.message
        );
        Ok(())
    }

    fn withdraw(&self) {
        if self.outstanding.swap(false, Ordering::SeqCst) {
            info!("payment prompt withdrawn");
        }
    }

    fn is_foreground(&self) -> bool {
        true
    }
}

/// Routes events to the gate.
pub struct Agent {
    gate: Arc<TriggerGate>,
    whitelist: Arc<Whitelist>,
    networks: TrustedNetworks,
}

impl Agent {
    pub fn new(gate: Arc<TriggerGate>, whitelist: Arc<Whitelist>, networks: TrustedNetworks) -> Self {
        Self {
            gate,
            whitelist,
            networks,
        }
    }

    /// Handle one input line. Returns a result object for lines that
    /// produce output (scans, rejected input).
    pub fn handle_line(&self, line: &str) -> Option<Value> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<ProximityEvent>(line) {
            Ok(event) => self.handle(event),
            Err(e) => {
                warn!(error = %e, "ignoring malformed event");
                Some(json!({ "error": format!("malformed event: {e}") }))
            }
        }
    }

    pub fn handle(&self, event: ProximityEvent) -> Option<Value> {
        match event {
            ProximityEvent::Geofence { in_zone, fence_id } => {
                self.gate.on_geofence_changed(in_zone, fence_id.as_deref());
                None
            }
            ProximityEvent::Beacon {
                uuid,
                major,
                minor,
                nonce,
                rssi,
            } => {
                self.beacon(&uuid, major, minor, nonce, rssi);
                None
            }
            ProximityEvent::Advertisement {
                company_id,
                data_hex,
                nonce,
                rssi,
            } => {
                let Ok(data) = hex::decode(data_hex.trim()) else {
                    debug!("advertisement payload is not hex");
                    return None;
                };
                match BeaconFrame::parse(company_id, &data) {
                    Ok(frame) => self.beacon(&frame.region_id, frame.major, frame.minor, nonce, rssi),
                    Err(e) => debug!(error = %e, "not an iBeacon advertisement"),
                }
                None
            }
            ProximityEvent::Wifi { ssid, bssid } => {
                let trusted = self.networks.is_trusted(ssid.as_deref(), bssid.as_deref());
                self.gate.on_trusted_network_changed(trusted);
                None
            }
            ProximityEvent::Foreground => {
                self.gate.on_app_foregrounded();
                None
            }
            ProximityEvent::Scan { code } => Some(self.scan(&code)),
        }
    }

    fn beacon(&self, uuid: &str, major: u16, minor: u16, nonce: Option<String>, rssi: i16) {
        if !is_near(rssi) {
            debug!(region = uuid, major, minor, rssi, "beacon too far, ignored");
            return;
        }
        self.gate.on_beacon_frame(uuid, major, minor, nonce, rssi);
    }

    fn scan(&self, code: &str) -> Value {
        if !self.gate.allowed_for_scan() {
            return json!({ "verified": false, "reason": "not at a trusted location" });
        }
        let beacon = self.gate.current_beacon();
        let fence = self.gate.last_fence_id();
        match verify_token(code, &self.whitelist, beacon.as_ref(), fence.as_deref()) {
            Ok(payload) => json!({ "verified": true, "payload": payload }),
            Err(e) => {
                info!(error = %e, "merchant code rejected");
                json!({ "verified": false, "reason": e.to_string() })
            }
        }
    }
}

/// Build a self-issued token for a prompt.
pub async fn mint_token(
    manager: &SessionKeyManager,
    prompt: &PaymentPrompt,
    merchant_id: &str,
) -> Result<String, SessionError> {
    let session = manager.ensure_session().await?;

    let mut payload = TokenPayload::new(uuid::Uuid::new_v4().to_string(), merchant_id);
    if let Some(loc) = &prompt.beacon_location {
        payload = payload.location(loc.clone());
    }
    if let Some(fence) = &prompt.fence_id {
        payload = payload.fence(fence.clone());
    }

    seal_payload(session.key_id(), session.enc_key(), &payload)
        .map_err(|e| SessionError::Protocol(format!("token build failed: {e}")))
}

/// Turn every prompt into a displayed token until the gate goes away.
pub async fn serve_prompts(
    mut prompts: broadcast::Receiver<PaymentPrompt>,
    gate: Arc<TriggerGate>,
    manager: Arc<SessionKeyManager>,
    default_merchant: String,
    no_qr: bool,
) {
    loop {
        let prompt = match prompts.recv().await {
            Ok(prompt) => prompt,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "prompt consumer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let merchant = gate
            .current_beacon()
            .and_then(|b| b.merchant_id)
            .unwrap_or_else(|| default_merchant.clone());

        match mint_token(&manager, &prompt, &merchant).await {
            Ok(token) => {
                if let Err(e) = render::print_token(&token, no_qr) {
                    warn!(error = %e, "failed to render token");
                }
            }
            Err(e) => warn!(error = %e, retryable = e.is_retryable(), "could not mint token"),
        }
    }
    debug!("prompt stream closed");
}
