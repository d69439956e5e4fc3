//! Webhook configuration and event rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

/// Which operations on a table a webhook watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEventSpec {
    /// `schema.table` the trigger watches.
    pub table: String,
    /// Subset of `INSERT`, `UPDATE`, `DELETE`.
    pub operations: Vec<String>,
}

/// A configured webhook endpoint.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Webhook {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub enabled: bool,
    pub events: Json<Vec<WebhookEventSpec>>,
    pub max_retries: i32,
    pub retry_backoff_seconds: i32,
    pub timeout_seconds: i32,
    pub headers: Json<HashMap<String, String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWebhook {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub events: Vec<WebhookEventSpec>,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_backoff")]
    pub retry_backoff_seconds: i32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: i32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_retries() -> i32 {
    3
}

fn default_backoff() -> i32 {
    60
}

fn default_timeout() -> i32 {
    30
}

/// Partial update for a webhook; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateWebhook {
    pub name: Option<String>,
    pub url: Option<String>,
    pub secret: Option<Option<String>>,
    pub enabled: Option<bool>,
    pub events: Option<Vec<WebhookEventSpec>>,
    pub max_retries: Option<i32>,
    pub retry_backoff_seconds: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub headers: Option<HashMap<String, String>>,
}

/// One queued row change awaiting delivery.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookEventRow {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub table_schema: String,
    pub table_name: String,
    pub record_id: Option<String>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub processed: bool,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One recorded delivery attempt, kept for observability.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub attempt_number: i32,
    pub status: String,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookEventRow {
    /// The delivery payload: `record` is the new row for INSERT/UPDATE and
    /// the old row for DELETE; `old_record` appears only on UPDATE.
    pub fn payload(&self, timestamp: DateTime<Utc>) -> Value {
        let mut payload = json!({
            "event": self.event_type,
            "table": self.table_name,
            "schema": self.table_schema,
            "timestamp": timestamp.to_rfc3339(),
        });

        match self.event_type.as_str() {
            "DELETE" => {
                payload["record"] = self.old_data.clone().unwrap_or(Value::Null);
            }
            "UPDATE" => {
                payload["record"] = self.new_data.clone().unwrap_or(Value::Null);
                payload["old_record"] = self.old_data.clone().unwrap_or(Value::Null);
            }
            _ => {
                payload["record"] = self.new_data.clone().unwrap_or(Value::Null);
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str) -> WebhookEventRow {
        WebhookEventRow {
            id: Uuid::nil(),
            webhook_id: Uuid::nil(),
            event_type: event_type.to_string(),
            table_schema: "public".to_string(),
            table_name: "users".to_string(),
            record_id: Some("1".to_string()),
            old_data: Some(json!({"id": 1, "name": "before"})),
            new_data: Some(json!({"id": 1, "name": "after"})),
            processed: false,
            attempts: 0,
            last_attempt_at: None,
            next_retry_at: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_payload_uses_new_data() {
        let payload = event("INSERT").payload(Utc::now());
        assert_eq!(payload["event"], "INSERT");
        assert_eq!(payload["record"]["name"], "after");
        assert!(payload.get("old_record").is_none());
    }

    #[test]
    fn update_payload_carries_both_rows() {
        let payload = event("UPDATE").payload(Utc::now());
        assert_eq!(payload["record"]["name"], "after");
        assert_eq!(payload["old_record"]["name"], "before");
    }

    #[test]
    fn delete_payload_uses_old_data() {
        let payload = event("DELETE").payload(Utc::now());
        assert_eq!(payload["record"]["name"], "before");
        assert!(payload.get("old_record").is_none());
    }

    #[test]
    fn payload_names_table_and_schema() {
        let payload = event("INSERT").payload(Utc::now());
        assert_eq!(payload["table"], "users");
        assert_eq!(payload["schema"], "public");
        assert!(payload["timestamp"].as_str().is_some());
    }

    #[test]
    fn webhook_serialization_hides_secret() {
        let webhook = Webhook {
            id: Uuid::nil(),
            name: "orders".to_string(),
            url: "https://example.com/hook".to_string(),
            secret: Some("shh".to_string()),
            enabled: true,
            events: Json(vec![]),
            max_retries: 3,
            retry_backoff_seconds: 60,
            timeout_seconds: 30,
            headers: Json(HashMap::new()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&webhook).unwrap();
        assert!(value.get("secret").is_none());
        assert_eq!(value["url"], "https://example.com/hook");
    }
}
