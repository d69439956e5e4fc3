//! Webhook configuration CRUD and event-queue access.
//!
//! The `auth.webhooks` tables sit behind row-level security; every access
//! here goes through a service-role transaction, the one sanctioned bypass
//! path. URLs and headers are validated on the way in.

use crate::error::WebhookError;
use crate::model::{NewWebhook, UpdateWebhook, Webhook, WebhookEventRow, WebhookEventSpec};
use crate::validate;
use chrono::{DateTime, Duration, Utc};
use fluxbase_db::Executor;
use serde_json::Value;
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

/// How many events one worker pass claims per webhook.
const CLAIM_BATCH: i64 = 10;

/// Repository over the webhook tables.
#[derive(Clone)]
pub struct WebhookRepo {
    executor: Executor,
}

impl WebhookRepo {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Create a webhook after validating its URL and headers.
    pub async fn create(&self, input: NewWebhook) -> Result<Webhook, WebhookError> {
        validate::validate_url(&input.url).await?;
        validate::validate_headers(&input.headers)?;

        let events = serde_json::to_value(&input.events)?;
        let headers = serde_json::to_value(&input.headers)?;

        let webhook = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let webhook = sqlx::query_as::<_, Webhook>(
                        "INSERT INTO auth.webhooks \
                             (name, url, secret, enabled, events, max_retries, \
                              retry_backoff_seconds, timeout_seconds, headers) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                         RETURNING *",
                    )
                    .bind(&input.name)
                    .bind(&input.url)
                    .bind(&input.secret)
                    .bind(input.enabled)
                    .bind(&events)
                    .bind(input.max_retries)
                    .bind(input.retry_backoff_seconds)
                    .bind(input.timeout_seconds)
                    .bind(&headers)
                    .fetch_one(&mut *conn)
                    .await?;
                    Ok(webhook)
                })
            })
            .await?;
        Ok(webhook)
    }

    /// All webhooks that have not been soft-deleted.
    pub async fn list(&self) -> Result<Vec<Webhook>, WebhookError> {
        let webhooks = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query_as::<_, Webhook>(
                        "SELECT * FROM auth.webhooks \
                         WHERE deleted_at IS NULL \
                         ORDER BY created_at",
                    )
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(rows)
                })
            })
            .await?;
        Ok(webhooks)
    }

    /// One webhook by id.
    pub async fn get(&self, id: Uuid) -> Result<Webhook, WebhookError> {
        let webhook = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let row = sqlx::query_as::<_, Webhook>(
                        "SELECT * FROM auth.webhooks WHERE id = $1 AND deleted_at IS NULL",
                    )
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;
                    Ok(row)
                })
            })
            .await?;
        webhook.ok_or(WebhookError::NotFound)
    }

    /// Apply a partial update, re-validating URL and headers when changed.
    pub async fn update(&self, id: Uuid, input: UpdateWebhook) -> Result<Webhook, WebhookError> {
        if let Some(url) = &input.url {
            validate::validate_url(url).await?;
        }
        if let Some(headers) = &input.headers {
            validate::validate_headers(headers)?;
        }

        let current = self.get(id).await?;

        let name = input.name.unwrap_or(current.name);
        let url = input.url.unwrap_or(current.url);
        let secret = input.secret.unwrap_or(current.secret);
        let enabled = input.enabled.unwrap_or(current.enabled);
        let events: Vec<WebhookEventSpec> = input.events.unwrap_or(current.events.0);
        let max_retries = input.max_retries.unwrap_or(current.max_retries);
        let retry_backoff_seconds = input
            .retry_backoff_seconds
            .unwrap_or(current.retry_backoff_seconds);
        let timeout_seconds = input.timeout_seconds.unwrap_or(current.timeout_seconds);
        let headers: HashMap<String, String> = input.headers.unwrap_or(current.headers.0);

        let events = serde_json::to_value(&events)?;
        let headers = serde_json::to_value(&headers)?;

        let webhook = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let row = sqlx::query_as::<_, Webhook>(
                        "UPDATE auth.webhooks \
                         SET name = $2, url = $3, secret = $4, enabled = $5, events = $6, \
                             max_retries = $7, retry_backoff_seconds = $8, \
                             timeout_seconds = $9, headers = $10 \
                         WHERE id = $1 AND deleted_at IS NULL \
                         RETURNING *",
                    )
                    .bind(id)
                    .bind(&name)
                    .bind(&url)
                    .bind(&secret)
                    .bind(enabled)
                    .bind(&events)
                    .bind(max_retries)
                    .bind(retry_backoff_seconds)
                    .bind(timeout_seconds)
                    .bind(&headers)
                    .fetch_optional(&mut *conn)
                    .await?;
                    Ok(row)
                })
            })
            .await?;
        webhook.ok_or(WebhookError::NotFound)
    }

    /// Soft-delete a webhook.
    pub async fn delete(&self, id: Uuid) -> Result<(), WebhookError> {
        let deleted = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        "UPDATE auth.webhooks SET deleted_at = now() \
                         WHERE id = $1 AND deleted_at IS NULL",
                    )
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                    Ok(result.rows_affected())
                })
            })
            .await?;
        if deleted == 0 {
            return Err(WebhookError::NotFound);
        }
        Ok(())
    }

    /// Claim up to ten due, unprocessed events for a webhook, oldest first.
    pub async fn claim_due_events(
        &self,
        webhook_id: Uuid,
    ) -> Result<Vec<WebhookEventRow>, WebhookError> {
        let events = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query_as::<_, WebhookEventRow>(
                        "SELECT * FROM auth.webhook_events \
                         WHERE webhook_id = $1 \
                           AND NOT processed \
                           AND (next_retry_at IS NULL OR next_retry_at <= now()) \
                         ORDER BY created_at ASC \
                         LIMIT $2",
                    )
                    .bind(webhook_id)
                    .bind(CLAIM_BATCH)
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(rows)
                })
            })
            .await?;
        Ok(events)
    }

    /// Mark an event delivered.
    pub async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), WebhookError> {
        self.executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "UPDATE auth.webhook_events \
                         SET processed = true, attempts = attempts + 1, \
                             last_attempt_at = now(), error = NULL \
                         WHERE id = $1",
                    )
                    .bind(event_id)
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                })
            })
            .await?;
        Ok(())
    }

    /// Record a failed attempt: schedule a retry, or mark the event
    /// permanently failed once retries are exhausted.
    pub async fn mark_event_failed(
        &self,
        event: &WebhookEventRow,
        max_retries: i32,
        backoff_seconds: i32,
        error: &str,
    ) -> Result<(), WebhookError> {
        let attempts = event.attempts + 1;
        let event_id = event.id;
        let error = error.to_string();

        if attempts >= max_retries {
            self.executor
                .with_service_role(move |conn| {
                    Box::pin(async move {
                        sqlx::query(
                            "UPDATE auth.webhook_events \
                             SET processed = true, attempts = $2, \
                                 last_attempt_at = now(), error = $3 \
                             WHERE id = $1",
                        )
                        .bind(event_id)
                        .bind(attempts)
                        .bind(&error)
                        .execute(&mut *conn)
                        .await?;
                        Ok(())
                    })
                })
                .await?;
        } else {
            let next_retry_at = next_retry_at(Utc::now(), backoff_seconds, attempts);
            self.executor
                .with_service_role(move |conn| {
                    Box::pin(async move {
                        sqlx::query(
                            "UPDATE auth.webhook_events \
                             SET attempts = $2, last_attempt_at = now(), \
                                 next_retry_at = $3, error = $4 \
                             WHERE id = $1",
                        )
                        .bind(event_id)
                        .bind(attempts)
                        .bind(next_retry_at)
                        .bind(&error)
                        .execute(&mut *conn)
                        .await?;
                        Ok(())
                    })
                })
                .await?;
        }
        Ok(())
    }

    /// Record a delivery attempt for observability.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_delivery(
        &self,
        webhook_id: Uuid,
        event_type: &str,
        payload: &Value,
        attempt_number: i32,
        status: &str,
        http_status: Option<i32>,
        response_body: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), WebhookError> {
        let event_type = event_type.to_string();
        let payload = payload.clone();
        let status = status.to_string();
        let response_body = response_body.map(|s| s.to_string());
        let error = error.map(|s| s.to_string());

        self.executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO auth.webhook_deliveries \
                             (webhook_id, event_type, payload, attempt_number, status, \
                              http_status, response_body, error, delivered_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, \
                                 CASE WHEN $5 = 'success' THEN now() END)",
                    )
                    .bind(webhook_id)
                    .bind(&event_type)
                    .bind(Json(&payload))
                    .bind(attempt_number)
                    .bind(&status)
                    .bind(http_status)
                    .bind(&response_body)
                    .bind(&error)
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                })
            })
            .await?;
        Ok(())
    }

    /// Recent delivery attempts for a webhook, newest first.
    pub async fn list_deliveries(
        &self,
        webhook_id: Uuid,
        limit: i64,
    ) -> Result<Vec<crate::model::WebhookDelivery>, WebhookError> {
        let deliveries = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query_as::<_, crate::model::WebhookDelivery>(
                        "SELECT * FROM auth.webhook_deliveries \
                         WHERE webhook_id = $1 \
                         ORDER BY created_at DESC \
                         LIMIT $2",
                    )
                    .bind(webhook_id)
                    .bind(limit)
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(rows)
                })
            })
            .await?;
        Ok(deliveries)
    }

    /// Distinct webhook ids with due work, for the backlog sweep.
    pub async fn backlog_webhook_ids(&self, limit: i64) -> Result<Vec<Uuid>, WebhookError> {
        let ids = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query_as::<_, (Uuid,)>(
                        "SELECT DISTINCT webhook_id FROM auth.webhook_events \
                         WHERE NOT processed \
                           AND (next_retry_at IS NULL OR next_retry_at <= now()) \
                         LIMIT $1",
                    )
                    .bind(limit)
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(rows.into_iter().map(|(id,)| id).collect::<Vec<_>>())
                })
            })
            .await?;
        Ok(ids)
    }

    /// Delete processed events older than the retention window.
    pub async fn purge_processed_events(&self, retention_days: i64) -> Result<u64, WebhookError> {
        let deleted = self
            .executor
            .with_service_role(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        "DELETE FROM auth.webhook_events \
                         WHERE processed AND created_at < now() - ($1 * interval '1 day')",
                    )
                    .bind(retention_days)
                    .execute(&mut *conn)
                    .await?;
                    Ok(result.rows_affected())
                })
            })
            .await?;
        Ok(deleted)
    }
}

/// Retry schedule: linear-exponential, `backoff * attempts` seconds out.
pub fn next_retry_at(now: DateTime<Utc>, backoff_seconds: i32, attempts: i32) -> DateTime<Utc> {
    now + Duration::seconds(i64::from(backoff_seconds) * i64::from(attempts))
}
