//! Session key manager: one valid session per device, established at most
//! once at a time.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, warn};

use super::api::{EcdhRequest, KeyApi, QrTokenRequest, QrTokenResponse};
use super::error::{SessionError, StoreError};
use super::store::{SessionRecord, SessionStore};
use crate::config::{
    AES_KEY_LENGTH, CLIENT_NONCE_LENGTH, KEY_EXCHANGE_TIMEOUT, MAC_KEY_LENGTH, PROTOCOL_VERSION,
};
use crate::crypto::ecdh::EphemeralKeyPair;
use crate::crypto::kdf::{derive_session_keys, SessionKeyMaterial};
use crate::token::verify_issued_token;

/// Who we are to the key server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub app_version: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            device_id: "proxpay-device".to_string(),
            app_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on one key-server round trip.
    pub exchange_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exchange_timeout: KEY_EXCHANGE_TIMEOUT,
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An established session: key id, both symmetric keys and expiry.
#[derive(Clone)]
pub struct Session {
    key_id: String,
    keys: SessionKeyMaterial,
    expires_at_ms: i64,
}

impl Session {
    pub fn new(key_id: impl Into<String>, keys: SessionKeyMaterial, expires_at_ms: i64) -> Self {
        Self {
            key_id: key_id.into(),
            keys,
            expires_at_ms,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn enc_key(&self) -> &[u8; AES_KEY_LENGTH] {
        self.keys.enc_key()
    }

    pub fn mac_key(&self) -> &[u8; MAC_KEY_LENGTH] {
        self.keys.mac_key()
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    /// Usable at `now_ms`: strictly before expiry.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            key_id: self.key_id.clone(),
            enc_key_b64: STANDARD.encode(self.keys.enc_key()),
            mac_key_b64: STANDARD.encode(self.keys.mac_key()),
            expires_at_ms: self.expires_at_ms,
        }
    }

    /// Rebuild from storage. `None` if the record is unusable.
    pub fn from_record(record: &SessionRecord) -> Option<Self> {
        let enc: [u8; AES_KEY_LENGTH] = STANDARD.decode(&record.enc_key_b64).ok()?.try_into().ok()?;
        let mac: [u8; MAC_KEY_LENGTH] = STANDARD.decode(&record.mac_key_b64).ok()?.try_into().ok()?;
        if record.key_id.is_empty() {
            return None;
        }
        Some(Self::new(
            record.key_id.clone(),
            SessionKeyMaterial::from_parts(enc, mac),
            record.expires_at_ms,
        ))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key_id", &self.key_id)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SessionKeyManager
// ---------------------------------------------------------------------------

type Establishment = Shared<BoxFuture<'static, Result<Session, SessionError>>>;

/// Guarantees a valid session before any token is built.
///
/// Concurrent [`ensure_session`](Self::ensure_session) calls during a cold
/// start share one key exchange: the first caller starts it, everyone else
/// awaits the same outcome. Two parallel exchanges would mint two sessions
/// on the server, and only one of them would end up stored here.
pub struct SessionKeyManager {
    api: Arc<dyn KeyApi>,
    store: Arc<dyn SessionStore>,
    identity: DeviceIdentity,
    config: SessionConfig,
    in_flight: Mutex<InFlight>,
}

#[derive(Default)]
struct InFlight {
    generation: u64,
    current: Option<(u64, Establishment)>,
}

impl SessionKeyManager {
    pub fn new(
        api: Arc<dyn KeyApi>,
        store: Arc<dyn SessionStore>,
        identity: DeviceIdentity,
        config: SessionConfig,
    ) -> Self {
        Self {
            api,
            store,
            identity,
            config,
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The stored session, if it is still valid. Never talks to the server.
    pub fn current_session(&self) -> Result<Option<Session>, SessionError> {
        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(StoreError::Corrupt(e)) => {
                warn!(error = %e, "stored session record is unreadable, ignoring it");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(session) = Session::from_record(&record) else {
            warn!("stored session record is unusable, ignoring it");
            return Ok(None);
        };
        if !session.is_valid_at(now_ms()) {
            debug!(key_id = session.key_id(), "stored session expired");
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Return a valid session, establishing one if needed.
    pub async fn ensure_session(&self) -> Result<Session, SessionError> {
        let (generation, establishment) = {
            let mut in_flight = self.in_flight.lock();
            match &in_flight.current {
                Some((generation, fut)) => {
                    debug!("joining in-flight session establishment");
                    (*generation, fut.clone())
                }
                None => {
                    if let Some(session) = self.current_session()? {
                        return Ok(session);
                    }
                    in_flight.generation += 1;
                    let generation = in_flight.generation;
                    let fut = establish(
                        self.api.clone(),
                        self.store.clone(),
                        self.identity.clone(),
                        self.config,
                    )
                    .boxed()
                    .shared();
                    in_flight.current = Some((generation, fut.clone()));
                    (generation, fut)
                }
            }
        };

        let outcome = establishment.await;

        let mut in_flight = self.in_flight.lock();
        if matches!(&in_flight.current, Some((g, _)) if *g == generation) {
            in_flight.current = None;
        }
        outcome
    }

    /// Ask the server to mint a token, and verify its HMAC with the session
    /// MAC key before handing it out.
    pub async fn issue_server_token(&self) -> Result<QrTokenResponse, SessionError> {
        let session = self.ensure_session().await?;
        let request = QrTokenRequest {
            uuid: uuid::Uuid::new_v4().to_string(),
        };

        let response = tokio::time::timeout(
            self.config.exchange_timeout,
            self.api.issue_qr_token(&request),
        )
        .await
        .map_err(|_| SessionError::Transport("token issuance timed out".into()))??;

        if verify_issued_token(&response, session.mac_key()).is_err() {
            warn!(request_id = %request.uuid, "server token failed HMAC check");
            return Err(SessionError::IntegrityCheckFailed);
        }
        debug!(request_id = %request.uuid, ts = response.ts, "server token verified");
        Ok(response)
    }

    /// Forget the stored session; the next `ensure_session` starts over.
    pub fn invalidate(&self) -> Result<(), SessionError> {
        self.store.clear()?;
        info!("session invalidated");
        Ok(())
    }
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, SessionError> {
    STANDARD
        .decode(value.trim())
        .map_err(|_| SessionError::Protocol(format!("{field} is not valid base64")))
}

async fn establish(
    api: Arc<dyn KeyApi>,
    store: Arc<dyn SessionStore>,
    identity: DeviceIdentity,
    config: SessionConfig,
) -> Result<Session, SessionError> {
    let keypair = EphemeralKeyPair::generate();
    let mut client_nonce = [0u8; CLIENT_NONCE_LENGTH];
    OsRng.fill_bytes(&mut client_nonce);

    let request = EcdhRequest {
        client_pub_b64: STANDARD.encode(keypair.public_key_bytes()),
        nonce_b64: STANDARD.encode(client_nonce),
        device_id: identity.device_id,
        app_ver: identity.app_version,
    };

    info!(device_id = %request.device_id, "establishing session");
    let response = tokio::time::timeout(config.exchange_timeout, api.ecdh(&request))
        .await
        .map_err(|_| SessionError::Transport("key exchange timed out".into()))??;

    if response.key_id.trim().is_empty() {
        return Err(SessionError::Protocol("empty key_id".into()));
    }
    if response.ttl_sec <= 0 {
        return Err(SessionError::Protocol(format!(
            "non-positive ttl_sec: {}",
            response.ttl_sec
        )));
    }
    let server_pub = decode_field(&response.server_pub_b64, "server_pub_b64")?;
    let server_nonce = decode_field(&response.server_nonce_b64, "server_nonce_b64")?;

    let shared = keypair
        .diffie_hellman(&server_pub)
        .map_err(|e| SessionError::Protocol(e.to_string()))?;
    let keys = derive_session_keys(shared.as_bytes(), &client_nonce, &server_nonce)
        .map_err(|e| SessionError::Protocol(e.to_string()))?;

    let expires_at_ms = now_ms().saturating_add(response.ttl_sec.saturating_mul(1000));
    let session = Session::new(response.key_id, keys, expires_at_ms);
    store.save(&session.to_record())?;

    info!(
        key_id = session.key_id(),
        expires_at_ms,
        "session established"
    );
    Ok(session)
}
