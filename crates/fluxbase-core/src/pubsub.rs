//! Cluster pub/sub abstraction.
//!
//! The schema cache broadcasts invalidations to sibling instances through
//! this trait so it never depends on a concrete transport. The production
//! implementation rides on Postgres NOTIFY/LISTEN (`fluxbase-db`); tests use
//! the in-memory bus below.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A live subscription to one channel. Dropping it ends the subscription.
pub struct Subscription {
    receiver: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }

    /// Receive the next payload, or `None` once the publisher side is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Publish/subscribe transport for cross-instance signalling.
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    /// Publish `payload` on `channel`, reaching all instances including this one.
    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()>;

    /// Subscribe to `channel`. Payloads published after this call are delivered.
    async fn subscribe(&self, channel: &str) -> anyhow::Result<Subscription>;
}

/// In-memory bus for tests and single-instance deployments.
#[derive(Default)]
pub struct LocalBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvalidationBus for LocalBus {
    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| anyhow::anyhow!("local bus lock poisoned"))?;
        if let Some(senders) = subscribers.get_mut(channel) {
            senders.retain(|tx| tx.try_send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> anyhow::Result<Subscription> {
        let (tx, rx) = mpsc::channel(16);
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| anyhow::anyhow!("local bus lock poisoned"))?;
        subscribers.entry(channel.to_string()).or_default().push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("schema_cache").await.unwrap();
        bus.publish("schema_cache", "invalidate").await.unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some("invalidate"));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("a").await.unwrap();
        bus.publish("b", "x").await.unwrap();
        bus.publish("a", "y").await.unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some("y"));
    }
}
