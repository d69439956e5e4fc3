//! Error types for database access.

use thiserror::Error;

/// Errors surfaced by the executors.
///
/// Integrity violations are classified on the way out so callers never have
/// to match on raw driver types for them; everything else stays a transparent
/// driver error.
#[derive(Debug, Error)]
pub enum DbError {
    /// Unique constraint violation (SQLSTATE 23505).
    #[error("unique constraint violation on {constraint:?}")]
    UniqueViolation { constraint: String },

    /// Foreign key constraint violation (SQLSTATE 23503).
    #[error("foreign key constraint violation on {constraint:?}")]
    ForeignKeyViolation { constraint: String },

    /// Check constraint violation (SQLSTATE 23514).
    #[error("check constraint violation on {constraint:?}")]
    CheckViolation { constraint: String },

    /// Failed to switch to the service role inside a transaction.
    #[error("failed to set service role: {0}")]
    RoleSwitch(String),

    /// Health check did not complete within its deadline.
    #[error("health check timed out")]
    HealthTimeout,

    /// Any other driver error (connectivity, syntax, RLS denial, ...).
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match crate::classify::DbErrorKind::classify(&err) {
            crate::classify::DbErrorKind::UniqueViolation { constraint } => {
                DbError::UniqueViolation { constraint }
            }
            crate::classify::DbErrorKind::ForeignKeyViolation { constraint } => {
                DbError::ForeignKeyViolation { constraint }
            }
            crate::classify::DbErrorKind::CheckViolation { constraint } => {
                DbError::CheckViolation { constraint }
            }
            crate::classify::DbErrorKind::Other => DbError::Sqlx(err),
        }
    }
}

impl DbError {
    /// Whether this error is one of the three classified integrity kinds.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            DbError::UniqueViolation { .. }
                | DbError::ForeignKeyViolation { .. }
                | DbError::CheckViolation { .. }
        )
    }
}
