//! Error types for the webhook subsystem.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Database-side failure.
    #[error("database error: {0}")]
    Db(#[from] fluxbase_db::DbError),

    /// URL failed SSRF validation.
    #[error("invalid webhook URL: {0}")]
    InvalidUrl(String),

    /// A custom header failed validation.
    #[error("invalid webhook header: {0}")]
    InvalidHeader(String),

    /// No webhook with the given id.
    #[error("webhook not found")]
    NotFound,

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
