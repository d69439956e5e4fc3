//! Two-tier migration engine.
//!
//! Fluxbase tracks two independent migration namespaces:
//! - **system**: embedded migrations shipped with the binary, recorded in
//!   `migrations.fluxbase` as a single `{version, dirty}` row with
//!   automatic drift recovery;
//! - **user**: `.up.sql`/`.down.sql` pairs from the application's
//!   migration directory, recorded per-file in `migrations.app` with an
//!   execution log.
//!
//! All DDL goes through the admin executor; nothing here touches the
//! runtime pool.

pub mod error;
pub mod runner;
pub mod system;
pub mod user;

pub use error::MigrationError;
pub use runner::Migrator;
pub use system::{SystemMigrator, EMBEDDED_MIGRATIONS};
pub use user::UserMigrator;
