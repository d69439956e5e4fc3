//! The webhook trigger service.
//!
//! One LISTEN connection feeds webhook ids into a bounded in-process queue
//! drained by a pool of workers. The queue is a hint, not the source of
//! truth: the database rows carry the retry schedule, and the periodic
//! backlog sweep re-enqueues anything a dropped notification or restart
//! left behind.

use crate::delivery::Deliverer;
use crate::model::{Webhook, WebhookEventRow};
use crate::repo::WebhookRepo;
use crate::{WebhookError, EVENT_CHANNEL};
use chrono::Utc;
use fluxbase_core::config::WebhookServiceConfig;
use fluxbase_db::Executor;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Webhook ids fetched per backlog sweep.
const BACKLOG_LIMIT: i64 = 50;

/// Long-running webhook delivery service.
pub struct WebhookService {
    repo: WebhookRepo,
    deliverer: Deliverer,
    executor: Executor,
    config: WebhookServiceConfig,
}

impl WebhookService {
    pub fn new(executor: Executor, config: WebhookServiceConfig) -> Self {
        Self {
            repo: WebhookRepo::new(executor.clone()),
            deliverer: Deliverer::new(Duration::from_secs(config.default_timeout_secs)),
            executor,
            config,
        }
    }

    pub fn repo(&self) -> &WebhookRepo {
        &self.repo
    }

    /// Spawn the listener, worker pool, backlog sweep and retention tasks.
    ///
    /// All tasks stop when `shutdown` flips to `true`.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel::<Uuid>(self.config.queue_buffer);
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::new();

        // Notification listener.
        {
            let service = self.clone();
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = service.run_listener(tx, shutdown).await {
                    tracing::error!(error = %err, "webhook listener exited with error");
                }
            }));
        }

        // Delivery workers.
        for worker in 0..self.config.workers {
            let service = self.clone();
            let rx = rx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                service.run_worker(worker, rx, shutdown).await;
            }));
        }

        // Backlog sweep, run once immediately to recover across restarts.
        {
            let service = self.clone();
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                service.run_backlog_sweep(tx, shutdown).await;
            }));
        }

        // Retention sweep.
        {
            let service = self;
            handles.push(tokio::spawn(async move {
                service.run_retention(shutdown).await;
            }));
        }

        handles
    }

    async fn run_listener(
        &self,
        tx: mpsc::Sender<Uuid>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WebhookError> {
        let mut listener = PgListener::connect_with(self.executor.pool())
            .await
            .map_err(fluxbase_db::DbError::from)?;
        listener
            .listen(EVENT_CHANNEL)
            .await
            .map_err(fluxbase_db::DbError::from)?;
        tracing::info!(channel = EVENT_CHANNEL, "webhook listener started");

        loop {
            tokio::select! {
                notification = listener.recv() => {
                    let notification = notification.map_err(fluxbase_db::DbError::from)?;
                    match notification.payload().parse::<Uuid>() {
                        Ok(webhook_id) => enqueue(&tx, webhook_id),
                        Err(_) => {
                            tracing::warn!(
                                payload = notification.payload(),
                                "ignoring malformed webhook notification"
                            );
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("webhook listener stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn run_worker(
        &self,
        worker: usize,
        rx: Arc<Mutex<mpsc::Receiver<Uuid>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let webhook_id = tokio::select! {
                id = async { rx.lock().await.recv().await } => id,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            };
            let Some(webhook_id) = webhook_id else {
                // Queue closed; nothing more will arrive.
                return;
            };

            // Delivery errors are recorded on the rows, never allowed to
            // take down the worker.
            if let Err(err) = self.process_webhook(webhook_id).await {
                tracing::warn!(
                    worker,
                    webhook_id = %webhook_id,
                    error = %err,
                    "webhook processing pass failed"
                );
            }
        }
    }

    /// One pass for one webhook: claim due events and deliver them in order.
    async fn process_webhook(&self, webhook_id: Uuid) -> Result<(), WebhookError> {
        let webhook = match self.repo.get(webhook_id).await {
            Ok(webhook) => webhook,
            Err(WebhookError::NotFound) => {
                tracing::debug!(webhook_id = %webhook_id, "webhook gone, skipping");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if !webhook.enabled {
            return Ok(());
        }

        let events = self.repo.claim_due_events(webhook_id).await?;
        for event in events {
            self.deliver_event(&webhook, &event).await?;
        }
        Ok(())
    }

    async fn deliver_event(
        &self,
        webhook: &Webhook,
        event: &WebhookEventRow,
    ) -> Result<(), WebhookError> {
        let payload = event.payload(Utc::now());
        let outcome = self.deliverer.deliver(webhook, &payload).await;
        let attempt_number = event.attempts + 1;

        if outcome.success {
            self.repo.mark_event_processed(event.id).await?;
            self.repo
                .record_delivery(
                    webhook.id,
                    &event.event_type,
                    &payload,
                    attempt_number,
                    "success",
                    outcome.http_status,
                    outcome.response_body.as_deref(),
                    None,
                )
                .await?;
            return Ok(());
        }

        let error = outcome
            .error
            .unwrap_or_else(|| "delivery failed".to_string());
        let exhausted = attempt_number >= webhook.max_retries;
        self.repo
            .mark_event_failed(
                event,
                webhook.max_retries,
                webhook.retry_backoff_seconds,
                &error,
            )
            .await?;
        self.repo
            .record_delivery(
                webhook.id,
                &event.event_type,
                &payload,
                attempt_number,
                if exhausted { "failed" } else { "retrying" },
                outcome.http_status,
                outcome.response_body.as_deref(),
                Some(&error),
            )
            .await?;

        tracing::warn!(
            webhook_id = %webhook.id,
            event_id = %event.id,
            attempt = attempt_number,
            exhausted,
            error = %error,
            "webhook delivery failed"
        );
        Ok(())
    }

    async fn run_backlog_sweep(&self, tx: mpsc::Sender<Uuid>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.backlog_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.repo.backlog_webhook_ids(BACKLOG_LIMIT).await {
                        Ok(ids) => {
                            for id in ids {
                                enqueue(&tx, id);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "backlog sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn run_retention(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.retention_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.repo.purge_processed_events(self.config.retention_days).await {
                        Ok(0) => {}
                        Ok(deleted) => {
                            tracing::info!(deleted, "purged processed webhook events");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "webhook retention sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Non-blocking enqueue; overflow is only a warning because the backlog
/// sweep will recover the id from the database.
fn enqueue(tx: &mpsc::Sender<Uuid>, webhook_id: Uuid) {
    if tx.try_send(webhook_id).is_err() {
        tracing::warn!(webhook_id = %webhook_id, "webhook queue full, dropping notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_drops_on_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        enqueue(&tx, first);
        enqueue(&tx, second); // dropped, queue full

        assert_eq!(rx.recv().await, Some(first));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn backlog_limit_matches_contract() {
        assert_eq!(BACKLOG_LIMIT, 50);
    }
}
