//! Error types for the migration engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database-side failure.
    #[error("database error: {0}")]
    Db(#[from] fluxbase_db::DbError),

    /// Failure reading the user migration directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A migration file name that cannot be parsed.
    #[error("invalid migration file name: {0}")]
    InvalidName(String),

    /// A specific migration failed to apply.
    #[error("migration {name} failed: {message}")]
    Failed { name: String, message: String },
}
