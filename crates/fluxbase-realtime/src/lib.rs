//! Realtime change-feed dispatch.
//!
//! A single long-lived connection listens on `fluxbase_changes`; each
//! notification is fanned out to the WebSocket subscribers of the matching
//! table channel through bounded per-connection queues. A subscriber that
//! cannot keep up is disconnected rather than allowed to stall the
//! dispatcher.

pub mod channel;
pub mod dispatcher;
pub mod message;

pub use channel::Channel;
pub use dispatcher::{ConnectionHandle, Dispatcher};
pub use message::{ChangeEvent, ChangeKind, ClientMessage, ServerMessage};

/// The NOTIFY channel carrying row-change payloads.
pub const CHANGES_CHANNEL: &str = "fluxbase_changes";
