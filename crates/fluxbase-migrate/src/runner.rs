//! Startup migration orchestration.

use crate::error::MigrationError;
use crate::system::SystemMigrator;
use crate::user::UserMigrator;
use fluxbase_db::AdminExecutor;
use std::path::PathBuf;

/// Runs the full startup sequence: system migrations, user migrations,
/// then role grants. Cache invalidation is broadcast by the caller once
/// this returns, so freshly-granted roles are visible everywhere.
pub struct Migrator<'a> {
    admin: &'a AdminExecutor,
    user_dir: PathBuf,
}

impl<'a> Migrator<'a> {
    pub fn new(admin: &'a AdminExecutor, user_dir: impl Into<PathBuf>) -> Self {
        Self {
            admin,
            user_dir: user_dir.into(),
        }
    }

    pub async fn run_all(&self) -> Result<(), MigrationError> {
        SystemMigrator::new(self.admin).run().await?;
        UserMigrator::new(self.admin).run(&self.user_dir).await?;
        self.admin.grant_roles_to_runtime_user().await?;
        tracing::info!("migrations complete");
        Ok(())
    }
}
