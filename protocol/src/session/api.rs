//! Key server contract and its HTTP implementation.
//!
//! Two calls, both `POST` with JSON bodies:
//!
//! | Path | Request | Response |
//! |------|---------|----------|
//! | `/v1/keys/ecdh` | [`EcdhRequest`] | [`EcdhResponse`] |
//! | `/v1/qr/issue`  | [`QrTokenRequest`] | [`QrTokenResponse`] |

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::SessionError;
use crate::config::{
    ECDH_ENDPOINT, KEY_EXCHANGE_TIMEOUT, KEY_SERVER_CONNECT_TIMEOUT, QR_ISSUE_ENDPOINT,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhRequest {
    /// Standard base64 of our uncompressed SEC1 public key.
    pub client_pub_b64: String,
    /// Standard base64 of the 16-byte client nonce.
    pub nonce_b64: String,
    pub device_id: String,
    pub app_ver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhResponse {
    pub key_id: String,
    pub ttl_sec: i64,
    /// Server public key, SEC1 or SPKI DER, standard base64.
    pub server_pub_b64: String,
    pub server_nonce_b64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrTokenRequest {
    /// Client-generated request id.
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrTokenResponse {
    pub token: String,
    pub ts: i64,
    /// Standard base64 of `HMAC-SHA256(mac_key, token || ts)`.
    #[serde(rename = "hmac")]
    pub hmac_b64: String,
}

// ---------------------------------------------------------------------------
// KeyApi
// ---------------------------------------------------------------------------

/// Transport to the key-issuing server.
#[async_trait]
pub trait KeyApi: Send + Sync {
    async fn ecdh(&self, request: &EcdhRequest) -> Result<EcdhResponse, SessionError>;

    async fn issue_qr_token(&self, request: &QrTokenRequest)
        -> Result<QrTokenResponse, SessionError>;
}

/// [`KeyApi`] over HTTPS with reqwest.
#[derive(Debug, Clone)]
pub struct HttpKeyApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpKeyApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        Self::with_timeout(base_url, KEY_EXCHANGE_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(KEY_SERVER_CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, SessionError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "key server request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "key server rejected request");
            return Err(map_status_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| SessionError::Protocol(format!("malformed response from {path}: {e}")))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SessionError {
    if e.is_timeout() {
        SessionError::Transport("key server request timed out".into())
    } else if e.is_connect() {
        SessionError::Transport(format!("cannot reach key server: {e}"))
    } else {
        SessionError::Transport(e.to_string())
    }
}

fn map_status_error(status: u16, body: &str) -> SessionError {
    match status {
        408 | 429 | 500..=599 => {
            SessionError::Transport(format!("key server error ({status}): {body}"))
        }
        _ => SessionError::Protocol(format!("key server refused request ({status}): {body}")),
    }
}

#[async_trait]
impl KeyApi for HttpKeyApi {
    async fn ecdh(&self, request: &EcdhRequest) -> Result<EcdhResponse, SessionError> {
        self.post(ECDH_ENDPOINT, request).await
    }

    async fn issue_qr_token(
        &self,
        request: &QrTokenRequest,
    ) -> Result<QrTokenResponse, SessionError> {
        self.post(QR_ISSUE_ENDPOINT, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> EcdhRequest {
        EcdhRequest {
            client_pub_b64: "BAAA".into(),
            nonce_b64: "AAAAAAAAAAAAAAAAAAAAAA==".into(),
            device_id: "dev-1".into(),
            app_ver: "0.1.0".into(),
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(request()).unwrap();
        for field in ["client_pub_b64", "nonce_b64", "device_id", "app_ver"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }

        let resp: QrTokenResponse =
            serde_json::from_str(r#"{"token":"t","ts":5,"hmac":"AA=="}"#).unwrap();
        assert_eq!(resp.hmac_b64, "AA==");
    }

    #[tokio::test]
    async fn test_ecdh_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/keys/ecdh"))
            .and(body_partial_json(serde_json::json!({ "device_id": "dev-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "key_id": "kid-1",
                "ttl_sec": 600,
                "server_pub_b64": "BBBB",
                "server_nonce_b64": "CCCC"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpKeyApi::new(format!("{}/", server.uri())).unwrap();
        let resp = api.ecdh(&request()).await.unwrap();
        assert_eq!(resp.key_id, "kid-1");
        assert_eq!(resp.ttl_sec, 600);
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let api = HttpKeyApi::new(server.uri()).unwrap();
        let err = api.ecdh(&request()).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_body_is_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"key_id\": 1}"))
            .mount(&server)
            .await;

        let api = HttpKeyApi::new(server.uri()).unwrap();
        assert!(matches!(
            api.ecdh(&request()).await,
            Err(SessionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_client_error_is_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad key"))
            .mount(&server)
            .await;

        let api = HttpKeyApi::new(server.uri()).unwrap();
        assert!(matches!(
            api.ecdh(&request()).await,
            Err(SessionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport() {
        // Port 9 (discard) on localhost is closed in any sane test environment.
        let api = HttpKeyApi::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(
            api.ecdh(&request()).await,
            Err(SessionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let api = HttpKeyApi::with_timeout(server.uri(), Duration::from_millis(200)).unwrap();
        assert!(matches!(
            api.ecdh(&request()).await,
            Err(SessionError::Transport(_))
        ));
    }
}
