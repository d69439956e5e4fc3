//! Webhook trigger service and signed delivery.
//!
//! Database triggers enqueue rows in `auth.webhook_events` and notify
//! `webhook_event`; the [`WebhookService`] drains that queue with a worker
//! pool, delivers signed HTTP POSTs, and schedules retries in the database
//! so they survive restarts. Outbound URLs pass SSRF validation both when a
//! webhook is configured and again before every delivery.

pub mod delivery;
pub mod error;
pub mod model;
pub mod repo;
pub mod service;
pub mod signature;
pub mod trigger;
pub mod validate;

pub use delivery::{Deliverer, DeliveryOutcome};
pub use error::WebhookError;
pub use model::{
    NewWebhook, UpdateWebhook, Webhook, WebhookDelivery, WebhookEventRow, WebhookEventSpec,
};
pub use repo::WebhookRepo;
pub use service::WebhookService;

/// The NOTIFY channel poked by the event trigger.
pub const EVENT_CHANNEL: &str = "webhook_event";
