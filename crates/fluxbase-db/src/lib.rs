//! Database access for Fluxbase.
//!
//! This crate owns every database socket in the process:
//! - [`Executor`]: the shared runtime-privilege connection pool serving all
//!   application traffic, with slow-query logging and per-operation metrics.
//! - [`AdminExecutor`]: on-demand admin sessions for DDL, never pooled.
//! - [`classify`]: typed classification of integrity-violation errors.
//! - [`PgNotifyBus`]: cluster pub/sub over Postgres NOTIFY/LISTEN.

pub mod admin;
pub mod classify;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod notify;
pub mod sql;
pub mod types;

pub use admin::{quote_ident, AdminExecutor};
pub use classify::{
    constraint_name, is_check_violation, is_fk_violation, is_unique_violation, DbErrorKind,
};
pub use error::DbError;
pub use executor::{Executor, PoolStats};
pub use metrics::{QueryMetrics, TracingMetrics};
pub use notify::PgNotifyBus;
pub use types::{RegClass, TsQuery, TsVector, Vector};

use fluxbase_core::config::DatabaseConfig;
use std::sync::Arc;

/// Capability handle bundling the two credential domains.
///
/// Passed to subsystems instead of globals; the runtime path serves
/// unprivileged work, the admin path exists only for DDL.
#[derive(Clone)]
pub struct DatabaseAccess {
    runtime: Executor,
    admin: Arc<AdminExecutor>,
}

impl DatabaseAccess {
    /// Connect both identities from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let runtime = Executor::connect(config).await?;
        let admin = AdminExecutor::new(
            config.admin_url().to_string(),
            config.runtime_user(),
            config.admin_is_runtime(),
        );
        Ok(Self {
            runtime,
            admin: Arc::new(admin),
        })
    }

    /// The runtime-privilege executor.
    pub fn runtime(&self) -> &Executor {
        &self.runtime
    }

    /// The admin executor.
    pub fn admin(&self) -> &AdminExecutor {
        &self.admin
    }
}
