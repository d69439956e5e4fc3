//! Classification of Postgres integrity-violation errors.
//!
//! The REST layer turns these into 4xx responses; nothing upstream should
//! ever need to match SQLSTATE codes itself.

use sqlx::error::DatabaseError;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

/// Typed classification of a database error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbErrorKind {
    UniqueViolation { constraint: String },
    ForeignKeyViolation { constraint: String },
    CheckViolation { constraint: String },
    Other,
}

impl DbErrorKind {
    /// Classify a driver error. Non-database errors are `Other`.
    pub fn classify(err: &sqlx::Error) -> Self {
        let Some(db_err) = as_database_error(err) else {
            return DbErrorKind::Other;
        };
        let constraint = db_err.constraint().unwrap_or_default().to_string();
        match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => DbErrorKind::UniqueViolation { constraint },
            Some(FOREIGN_KEY_VIOLATION) => DbErrorKind::ForeignKeyViolation { constraint },
            Some(CHECK_VIOLATION) => DbErrorKind::CheckViolation { constraint },
            _ => DbErrorKind::Other,
        }
    }
}

fn as_database_error(err: &sqlx::Error) -> Option<&dyn DatabaseError> {
    match err {
        sqlx::Error::Database(db_err) => Some(db_err.as_ref()),
        _ => None,
    }
}

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    as_database_error(err)
        .and_then(|e| e.code())
        .map(|c| c == code)
        .unwrap_or(false)
}

/// Whether `err` is a unique constraint violation (SQLSTATE 23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_code(err, UNIQUE_VIOLATION)
}

/// Whether `err` is a foreign key constraint violation (SQLSTATE 23503).
pub fn is_fk_violation(err: &sqlx::Error) -> bool {
    has_code(err, FOREIGN_KEY_VIOLATION)
}

/// Whether `err` is a check constraint violation (SQLSTATE 23514).
pub fn is_check_violation(err: &sqlx::Error) -> bool {
    has_code(err, CHECK_VIOLATION)
}

/// The violated constraint's name, or empty when unavailable.
pub fn constraint_name(err: &sqlx::Error) -> String {
    as_database_error(err)
        .and_then(|e| e.constraint())
        .unwrap_or_default()
        .to_string()
}
