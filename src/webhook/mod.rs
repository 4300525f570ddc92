//! Webhook Dispatcher: signed, at-least-once HTTP POST with bounded
//! exponential retry. Delivery is best-effort — a
//! delivery failure after all attempts is logged but never fails the
//! upstream job.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WebhookConfig;
use crate::provider::retry::backoff_delay;

type HmacSha256 = Hmac<Sha256>;
use sha2::Sha256;

/// Synthetic status values a webhook payload can carry in addition to the
/// instance lifecycle statuses. Instance statuses are
/// passed through via their own `Display` impl instead.
#[derive(Debug, Clone, Copy)]
pub enum SyntheticStatus {
    StartupInitiated,
    StartupCompleted,
    StartupFailed,
    Deleted,
    Timeout,
}

impl SyntheticStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartupInitiated => "startup_initiated",
            Self::StartupCompleted => "startup_completed",
            Self::StartupFailed => "startup_failed",
            Self::Deleted => "deleted",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub instance_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub novita_instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "elapsedTime")]
    pub elapsed_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Computes the `X-Webhook-Signature` value for a given secret + raw body.
/// Exposed so receivers' test suites (and ours) can check both directions:
/// `verify(sign(body, secret), body, secret) == true`, any byte flip fails.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn verify(signature: &str, secret: &[u8], body: &[u8]) -> bool {
    sign(secret, body) == signature
}

pub struct WebhookDispatcher {
    http: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("reqwest client config is always valid here");
        Self { http, config }
    }

    /// Deliver `payload` to `url`. Retries on network errors and `5xx`; a
    /// `2xx` is success, any other `4xx` is a permanent failure. Exhaustion
    /// is logged and swallowed — webhooks never fail the calling job.
    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) {
        let body = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize webhook payload");
                return;
            }
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut req = self
                .http
                .post(url)
                .header("Content-Type", "application/json")
                .body(body.clone());

            if let Some(secret) = &self.config.secret {
                let signature = sign(secret.expose_secret().as_bytes(), &body);
                let timestamp = Utc::now().timestamp().to_string();
                req = req
                    .header("X-Webhook-Signature", signature)
                    .header("X-Webhook-Timestamp", timestamp);
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(%url, instance_id = %payload.instance_id, attempt, "webhook delivered");
                    return;
                }
                Ok(resp) if resp.status().is_server_error() && attempt < self.config.max_attempts => {
                    tracing::warn!(%url, status = %resp.status(), attempt, "webhook 5xx, retrying");
                }
                Ok(resp) => {
                    tracing::warn!(
                        %url,
                        status = %resp.status(),
                        instance_id = %payload.instance_id,
                        "webhook delivery failed permanently, not retrying"
                    );
                    return;
                }
                Err(e) if attempt < self.config.max_attempts => {
                    tracing::warn!(%url, error = %e, attempt, "webhook network error, retrying");
                }
                Err(e) => {
                    tracing::warn!(
                        %url,
                        error = %e,
                        instance_id = %payload.instance_id,
                        "webhook delivery exhausted retries, giving up (best-effort)"
                    );
                    return;
                }
            }

            tokio::time::sleep(backoff_delay(
                attempt,
                std::time::Duration::from_secs(1),
                std::time::Duration::from_secs(4),
            ))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_matches_sign_and_rejects_tampering() {
        let secret = b"shh";
        let body = br#"{"instanceId":"i-1"}"#;
        let sig = sign(secret, body);
        assert!(verify(&sig, secret, body));

        let mut tampered = body.to_vec();
        tampered[0] = b'X';
        assert!(!verify(&sig, secret, &tampered));
    }

    #[tokio::test]
    async fn delivers_successfully_on_2xx() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new(WebhookConfig {
            secret: None,
            timeout: std::time::Duration::from_secs(5),
            max_attempts: 3,
        });
        let payload = WebhookPayload {
            instance_id: "i-1".to_string(),
            status: "ready".to_string(),
            timestamp: Utc::now(),
            novita_instance_id: Some("p-42".to_string()),
            elapsed_time: None,
            error: None,
            reason: None,
            startup_operation: None,
            health_check: None,
            data: None,
        };
        dispatcher
            .deliver(&format!("{}/hook", server.uri()), &payload)
            .await;
    }

    #[tokio::test]
    async fn does_not_retry_permanent_4xx() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new(WebhookConfig {
            secret: None,
            timeout: std::time::Duration::from_secs(5),
            max_attempts: 3,
        });
        let payload = WebhookPayload {
            instance_id: "i-1".to_string(),
            status: "failed".to_string(),
            timestamp: Utc::now(),
            novita_instance_id: None,
            elapsed_time: None,
            error: Some("boom".to_string()),
            reason: None,
            startup_operation: None,
            health_check: None,
            data: None,
        };
        dispatcher
            .deliver(&format!("{}/hook", server.uri()), &payload)
            .await;
    }
}
