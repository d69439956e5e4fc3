//! Subscriber registry and notification fan-out.

use crate::channel::Channel;
use crate::message::{ChangeEvent, ServerMessage};
use crate::CHANGES_CHANNEL;
use sqlx::postgres::{PgListener, PgPool};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};

/// Identifies one WebSocket connection.
pub type ConnectionId = u64;

struct Subscriber {
    sender: mpsc::Sender<ServerMessage>,
    overflowed: Arc<AtomicBool>,
    /// Authenticated identity, threaded through dispatch so per-subscriber
    /// policy checks can attach here without protocol changes.
    user: Option<String>,
    channels: HashSet<Channel>,
}

/// Handle returned to the WebSocket task on registration.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub receiver: mpsc::Receiver<ServerMessage>,
    overflowed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Whether this connection was dropped for falling behind.
    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<ConnectionId, Subscriber>,
    by_channel: HashMap<Channel, HashSet<ConnectionId>>,
}

/// Fan-out hub between the LISTEN loop and WebSocket connections.
pub struct Dispatcher {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Dispatcher {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            queue_capacity,
        }
    }

    /// Register a connection, returning its outbound queue.
    pub fn register(&self, user: Option<String>) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let overflowed = Arc::new(AtomicBool::new(false));

        let mut registry = self.registry.write().expect("dispatcher lock poisoned");
        registry.subscribers.insert(
            id,
            Subscriber {
                sender,
                overflowed: overflowed.clone(),
                user,
                channels: HashSet::new(),
            },
        );

        ConnectionHandle {
            id,
            receiver,
            overflowed,
        }
    }

    /// Remove a connection and all of its subscriptions.
    pub fn unregister(&self, id: ConnectionId) {
        let mut registry = self.registry.write().expect("dispatcher lock poisoned");
        if let Some(subscriber) = registry.subscribers.remove(&id) {
            for channel in subscriber.channels {
                if let Some(members) = registry.by_channel.get_mut(&channel) {
                    members.remove(&id);
                    if members.is_empty() {
                        registry.by_channel.remove(&channel);
                    }
                }
            }
        }
    }

    /// Subscribe a connection to a channel.
    pub fn subscribe(&self, id: ConnectionId, channel: Channel) {
        let mut registry = self.registry.write().expect("dispatcher lock poisoned");
        if let Some(subscriber) = registry.subscribers.get_mut(&id) {
            subscriber.channels.insert(channel.clone());
            registry.by_channel.entry(channel).or_default().insert(id);
        }
    }

    /// Remove one subscription.
    pub fn unsubscribe(&self, id: ConnectionId, channel: &Channel) {
        let mut registry = self.registry.write().expect("dispatcher lock poisoned");
        if let Some(subscriber) = registry.subscribers.get_mut(&id) {
            subscriber.channels.remove(channel);
        }
        if let Some(members) = registry.by_channel.get_mut(channel) {
            members.remove(&id);
            if members.is_empty() {
                registry.by_channel.remove(channel);
            }
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry
            .read()
            .expect("dispatcher lock poisoned")
            .subscribers
            .len()
    }

    /// Fan a change event out to every subscriber of its channel.
    ///
    /// Sends are non-blocking; a subscriber with a full queue is dropped so
    /// one slow reader cannot stall the listener.
    pub fn dispatch(&self, event: &ChangeEvent) {
        let channel = event.channel();
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize change event");
                return;
            }
        };

        let mut overflowed_ids = Vec::new();
        {
            let registry = self.registry.read().expect("dispatcher lock poisoned");
            let Some(members) = registry.by_channel.get(&channel) else {
                return;
            };
            for id in members {
                let Some(subscriber) = registry.subscribers.get(id) else {
                    continue;
                };
                let message = ServerMessage::Broadcast {
                    channel: channel.as_str().to_string(),
                    payload: payload.clone(),
                };
                if subscriber.sender.try_send(message).is_err() {
                    subscriber.overflowed.store(true, Ordering::Release);
                    overflowed_ids.push(*id);
                }
            }
        }

        for id in overflowed_ids {
            tracing::warn!(
                connection = id,
                channel = %channel,
                "subscriber queue full, disconnecting"
            );
            self.unregister(id);
        }
    }

    /// Enqueue a message for one connection. Returns `false` when the
    /// connection is gone or its queue is full.
    pub fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let registry = self.registry.read().expect("dispatcher lock poisoned");
        registry
            .subscribers
            .get(&id)
            .map(|s| s.sender.try_send(message).is_ok())
            .unwrap_or(false)
    }

    /// Drop every connection; their queues close and the WS tasks wind down.
    pub fn close_all(&self) {
        let mut registry = self.registry.write().expect("dispatcher lock poisoned");
        registry.subscribers.clear();
        registry.by_channel.clear();
    }

    /// The identity a connection registered with.
    pub fn user_of(&self, id: ConnectionId) -> Option<String> {
        self.registry
            .read()
            .expect("dispatcher lock poisoned")
            .subscribers
            .get(&id)
            .and_then(|s| s.user.clone())
    }
}

/// Run the LISTEN loop until `shutdown` flips.
///
/// Being the only reader of the notification stream is what preserves
/// per-channel ordering.
pub async fn run_listener(
    pool: PgPool,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut listener = PgListener::connect_with(&pool).await?;
    listener.listen(CHANGES_CHANNEL).await?;
    tracing::info!(channel = CHANGES_CHANNEL, "realtime listener started");

    loop {
        tokio::select! {
            notification = listener.recv() => {
                match notification {
                    Ok(notification) => {
                        match serde_json::from_str::<ChangeEvent>(notification.payload()) {
                            Ok(event) => dispatcher.dispatch(&event),
                            Err(err) => {
                                tracing::warn!(error = %err, "ignoring malformed change notification");
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "realtime listener connection lost");
                        return Err(err.into());
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("realtime listener stopping");
                    dispatcher.close_all();
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChangeKind;

    fn insert_event(schema: &str, table: &str) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Insert,
            schema: schema.to_string(),
            table: table.to_string(),
            record: Some(serde_json::json!({"id": 1})),
            old_record: None,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_channel_subscribers() {
        let dispatcher = Dispatcher::new(8);
        let mut handle = dispatcher.register(None);
        dispatcher.subscribe(handle.id, Channel::table("public", "users"));

        dispatcher.dispatch(&insert_event("public", "users"));

        let message = handle.receiver.recv().await.unwrap();
        match message {
            ServerMessage::Broadcast { channel, payload } => {
                assert_eq!(channel, "table:public.users");
                assert_eq!(payload["type"], "INSERT");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrelated_channels_receive_nothing() {
        let dispatcher = Dispatcher::new(8);
        let mut handle = dispatcher.register(None);
        dispatcher.subscribe(handle.id, Channel::table("public", "orders"));

        dispatcher.dispatch(&insert_event("public", "users"));

        assert!(handle.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let dispatcher = Dispatcher::new(8);
        let mut handle = dispatcher.register(None);
        let channel = Channel::table("public", "users");
        dispatcher.subscribe(handle.id, channel.clone());
        dispatcher.unsubscribe(handle.id, &channel);

        dispatcher.dispatch(&insert_event("public", "users"));
        assert!(handle.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_disconnected() {
        let dispatcher = Dispatcher::new(1);
        let handle = dispatcher.register(None);
        dispatcher.subscribe(handle.id, Channel::table("public", "users"));

        // First fills the queue, second overflows.
        dispatcher.dispatch(&insert_event("public", "users"));
        dispatcher.dispatch(&insert_event("public", "users"));

        assert!(handle.overflowed());
        assert_eq!(dispatcher.connection_count(), 0);
    }

    #[tokio::test]
    async fn ordering_preserved_per_channel() {
        let dispatcher = Dispatcher::new(16);
        let mut handle = dispatcher.register(None);
        dispatcher.subscribe(handle.id, Channel::table("public", "users"));

        for i in 0..5 {
            let mut event = insert_event("public", "users");
            event.record = Some(serde_json::json!({"id": i}));
            dispatcher.dispatch(&event);
        }

        for i in 0..5 {
            match handle.receiver.recv().await.unwrap() {
                ServerMessage::Broadcast { payload, .. } => {
                    assert_eq!(payload["record"]["id"], i);
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn user_identity_is_threaded_through() {
        let dispatcher = Dispatcher::new(8);
        let handle = dispatcher.register(Some("user-42".to_string()));
        assert_eq!(dispatcher.user_of(handle.id).as_deref(), Some("user-42"));

        let anonymous = dispatcher.register(None);
        assert_eq!(dispatcher.user_of(anonymous.id), None);
    }

    #[tokio::test]
    async fn close_all_drops_queues() {
        let dispatcher = Dispatcher::new(8);
        let mut handle = dispatcher.register(None);
        dispatcher.subscribe(handle.id, Channel::table("public", "users"));

        dispatcher.close_all();
        assert!(handle.receiver.recv().await.is_none());
    }
}
