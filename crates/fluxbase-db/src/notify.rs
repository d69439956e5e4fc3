//! Cluster pub/sub over Postgres NOTIFY/LISTEN.

use async_trait::async_trait;
use fluxbase_core::pubsub::{InvalidationBus, Subscription};
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::mpsc;

/// [`InvalidationBus`] backed by the database every instance already shares.
pub struct PgNotifyBus {
    pool: PgPool,
}

impl PgNotifyBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvalidationBus for PgNotifyBus {
    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> anyhow::Result<Subscription> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;

        let (tx, rx) = mpsc::channel(16);
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        if tx.send(notification.payload().to_string()).await.is_err() {
                            // Subscriber dropped; stop listening.
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(channel = %channel, error = %err, "notify listener error, stopping");
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
