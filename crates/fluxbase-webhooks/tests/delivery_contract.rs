//! Contract tests for the webhook delivery pipeline: payload shapes, the
//! signature scheme receivers verify against, and the retry schedule.
//!
//! Run with: cargo test --package fluxbase-webhooks --test delivery_contract

use chrono::{Duration, TimeZone, Utc};
use fluxbase_webhooks::model::WebhookEventRow;
use fluxbase_webhooks::repo::next_retry_at;
use fluxbase_webhooks::signature;
use fluxbase_webhooks::validate;
use serde_json::json;
use uuid::Uuid;

fn event_row(event_type: &str) -> WebhookEventRow {
    WebhookEventRow {
        id: Uuid::new_v4(),
        webhook_id: Uuid::new_v4(),
        event_type: event_type.to_string(),
        table_schema: "public".to_string(),
        table_name: "orders".to_string(),
        record_id: Some("42".to_string()),
        old_data: Some(json!({"id": 42, "total": 10})),
        new_data: Some(json!({"id": 42, "total": 25})),
        processed: false,
        attempts: 0,
        last_attempt_at: None,
        next_retry_at: None,
        error: None,
        created_at: Utc::now(),
    }
}

#[test]
fn receiver_can_verify_what_we_would_send() {
    let payload = event_row("INSERT").payload(Utc::now());
    let body = serde_json::to_vec(&payload).unwrap();

    // Plain signature, as carried in X-Webhook-Signature.
    let sig = signature::sign("shared-secret", &body);
    assert_eq!(sig, signature::sign("shared-secret", &body));
    assert_eq!(sig.len(), 64);

    // Timestamped scheme for receivers that want replay protection.
    let now = 1_750_000_000;
    let header = signature::timestamped_signature("shared-secret", now, &body);
    signature::verify_timestamped(&header, &body, "shared-secret", 300, now + 60).unwrap();
    assert!(
        signature::verify_timestamped(&header, &body, "wrong", 300, now + 60).is_err()
    );
}

#[test]
fn payload_shape_tracks_operation() {
    let insert = event_row("INSERT").payload(Utc::now());
    assert_eq!(insert["record"]["total"], 25);
    assert!(insert.get("old_record").is_none());

    let update = event_row("UPDATE").payload(Utc::now());
    assert_eq!(update["record"]["total"], 25);
    assert_eq!(update["old_record"]["total"], 10);

    let delete = event_row("DELETE").payload(Utc::now());
    assert_eq!(delete["record"]["total"], 10);
}

#[test]
fn retry_schedule_is_linear_in_attempts() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    // First failure waits one backoff, third failure waits three.
    assert_eq!(next_retry_at(now, 60, 1), now + Duration::seconds(60));
    assert_eq!(next_retry_at(now, 60, 3), now + Duration::seconds(180));
}

#[tokio::test]
async fn configuration_rejects_the_ssrf_canon() {
    for url in [
        "http://169.254.169.254/latest/meta-data/",
        "http://localhost/x",
        "ftp://example.com",
        "http://metadata.google.internal",
    ] {
        assert!(validate::validate_url(url).await.is_err(), "{url}");
    }
}

#[test]
fn configuration_rejects_dangerous_headers() {
    let oversized = "a".repeat(8193);
    let cases: [(&str, &str, &str); 3] = [
        ("Content-Length", "10", "not allowed"),
        ("X-Evil", "a\r\nX-Injected: y", "invalid characters"),
        ("X-Custom", oversized.as_str(), "maximum length"),
    ];
    for (name, value, needle) in cases {
        let headers = std::collections::HashMap::from([(name.to_string(), value.to_string())]);
        let err = validate::validate_headers(&headers).unwrap_err();
        assert!(err.to_string().contains(needle), "{name}: {err}");
    }
}
