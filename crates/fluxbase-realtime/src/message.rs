//! Wire messages: the WebSocket protocol and the NOTIFY payload shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row-change kinds as emitted by the database triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The JSON payload of a `fluxbase_changes` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,
}

impl ChangeEvent {
    /// The channel this event is broadcast on.
    pub fn channel(&self) -> crate::channel::Channel {
        crate::channel::Channel::table(&self.schema, &self.table)
    }
}

/// Messages a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

/// Messages the server sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Ack { channel: String },
    Broadcast { channel: String, payload: Value },
    Heartbeat,
    Error { error: String },
}
