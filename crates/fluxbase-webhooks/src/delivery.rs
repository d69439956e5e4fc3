//! Signed HTTP delivery.

use crate::model::Webhook;
use crate::signature;
use crate::validate;
use serde_json::Value;
use std::time::Duration;

/// Response body bytes kept for the delivery record.
const MAX_RESPONSE_BODY: usize = 1024;

/// Result of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    fn blocked(reason: String) -> Self {
        Self {
            success: false,
            http_status: None,
            response_body: None,
            error: Some(reason),
        }
    }
}

/// HTTP client wrapper for webhook POSTs.
#[derive(Clone)]
pub struct Deliverer {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl Deliverer {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_timeout,
        }
    }

    /// POST `payload` to the webhook's URL.
    ///
    /// The URL is re-validated immediately before the request; a 2xx status
    /// is success, anything else is a failure carrying the status and a
    /// bounded slice of the response body.
    pub async fn deliver(&self, webhook: &Webhook, payload: &Value) -> DeliveryOutcome {
        if let Err(err) = validate::validate_url(&webhook.url).await {
            return DeliveryOutcome::blocked(err.to_string());
        }

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => return DeliveryOutcome::blocked(format!("payload serialization: {err}")),
        };

        let timeout = if webhook.timeout_seconds > 0 {
            Duration::from_secs(webhook.timeout_seconds as u64)
        } else {
            self.default_timeout
        };

        let mut request = self
            .client
            .post(&webhook.url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .header("User-Agent", "Fluxbase-Webhooks/1.0");

        for (name, value) in webhook.headers.0.iter() {
            request = request.header(name, value);
        }

        if let Some(secret) = &webhook.secret {
            request = request.header("X-Webhook-Signature", signature::sign(secret, &body));
        }

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(err) => {
                return DeliveryOutcome {
                    success: false,
                    http_status: err.status().map(|s| s.as_u16() as i32),
                    response_body: None,
                    error: Some(err.to_string()),
                };
            }
        };

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();
        let truncated: String = body_text.chars().take(MAX_RESPONSE_BODY).collect();

        if status.is_success() {
            DeliveryOutcome {
                success: true,
                http_status: Some(status.as_u16() as i32),
                response_body: Some(truncated),
                error: None,
            }
        } else {
            DeliveryOutcome {
                success: false,
                http_status: Some(status.as_u16() as i32),
                response_body: Some(truncated),
                error: Some(format!("unexpected status {}", status.as_u16())),
            }
        }
    }
}
