//! System (embedded) migrations with drift recovery.
//!
//! The tracked state is a single `{version, dirty}` row. Drift, meaning a
//! recorded version newer than anything we ship or a dirty flag left by an
//! interrupted run, is recovered automatically rather than failing
//! startup: branch switches and renumbered bundles are routine during
//! development.

use crate::error::MigrationError;
use fluxbase_db::AdminExecutor;

/// One embedded migration, paired up/down.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedMigration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// The bundled system migrations, ascending by version.
pub const EMBEDDED_MIGRATIONS: &[EmbeddedMigration] = &[
    EmbeddedMigration {
        version: 1,
        name: "init",
        up: include_str!("sql/001_init.up.sql"),
        down: include_str!("sql/001_init.down.sql"),
    },
    EmbeddedMigration {
        version: 2,
        name: "webhooks",
        up: include_str!("sql/002_webhooks.up.sql"),
        down: include_str!("sql/002_webhooks.down.sql"),
    },
    EmbeddedMigration {
        version: 3,
        name: "realtime",
        up: include_str!("sql/003_realtime.up.sql"),
        down: include_str!("sql/003_realtime.down.sql"),
    },
];

/// How recorded state is reconciled against the available bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftAction {
    /// State and bundle agree; nothing to fix.
    None,
    /// Reset the recorded version to the bundle's highest and clear dirty.
    ResetToHighest,
    /// Files for the recorded version exist; just clear the dirty flag.
    ClearDirty,
}

/// Decide the recovery action for `(recorded, dirty)` against a bundle.
///
/// Pure so the decision table is testable without a database.
pub fn reconcile(recorded: i64, dirty: bool, available: &[i64]) -> DriftAction {
    let highest = available.iter().copied().max().unwrap_or(0);
    if recorded > highest {
        return DriftAction::ResetToHighest;
    }
    if recorded > 0 && !available.contains(&recorded) {
        return DriftAction::ResetToHighest;
    }
    if dirty {
        return DriftAction::ClearDirty;
    }
    DriftAction::None
}

/// Runner for the system namespace.
pub struct SystemMigrator<'a> {
    admin: &'a AdminExecutor,
}

impl<'a> SystemMigrator<'a> {
    pub fn new(admin: &'a AdminExecutor) -> Self {
        Self { admin }
    }

    /// Bring the database up to the highest embedded version.
    pub async fn run(&self) -> Result<(), MigrationError> {
        self.ensure_tracking().await?;

        let (mut recorded, dirty) = self.read_state().await?;
        let available: Vec<i64> = EMBEDDED_MIGRATIONS.iter().map(|m| m.version).collect();
        let highest = available.iter().copied().max().unwrap_or(0);

        match reconcile(recorded, dirty, &available) {
            DriftAction::None => {}
            DriftAction::ResetToHighest => {
                tracing::warn!(
                    recorded,
                    highest,
                    "system migration drift detected, resetting to highest available version"
                );
                self.write_state(highest, false).await?;
                recorded = highest;
            }
            DriftAction::ClearDirty => {
                tracing::warn!(recorded, "clearing dirty system migration state");
                self.write_state(recorded, false).await?;
            }
        }

        match self.apply_pending(recorded).await {
            Ok(()) => Ok(()),
            Err(MigrationError::Failed { ref name, ref message })
                if message.contains("does not exist") =>
            {
                // A missing object mid-bundle means the recorded state was
                // built from a different bundle. Force to the highest
                // version and retry once.
                tracing::warn!(
                    migration = %name,
                    error = %message,
                    "system migration hit missing object, forcing version and retrying"
                );
                self.write_state(highest, false).await?;
                self.apply_pending(highest).await
            }
            Err(err) => Err(err),
        }
    }

    async fn apply_pending(&self, from: i64) -> Result<(), MigrationError> {
        for migration in EMBEDDED_MIGRATIONS.iter().filter(|m| m.version > from) {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "applying system migration"
            );

            // Record intent first: an interruption leaves a dirty row the
            // next startup recovers from.
            self.write_state(migration.version, true).await?;

            let sql = migration.up.to_string();
            let applied = self
                .admin
                .execute_with_admin(async move |conn| {
                    sqlx::raw_sql(&sql).execute(conn).await?;
                    Ok(())
                })
                .await;

            if let Err(err) = applied {
                return Err(MigrationError::Failed {
                    name: format!("{:03}_{}", migration.version, migration.name),
                    message: err.to_string(),
                });
            }

            self.write_state(migration.version, false).await?;
        }
        Ok(())
    }

    async fn ensure_tracking(&self) -> Result<(), MigrationError> {
        const TRACKING_DDL: &str = r#"
            CREATE SCHEMA IF NOT EXISTS migrations;

            CREATE TABLE IF NOT EXISTS migrations.fluxbase (
                version bigint NOT NULL,
                dirty boolean NOT NULL DEFAULT false
            );

            CREATE TABLE IF NOT EXISTS migrations.app (
                id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
                namespace text NOT NULL DEFAULT 'filesystem',
                name text NOT NULL,
                up_sql text,
                down_sql text,
                status text NOT NULL DEFAULT 'pending',
                applied_at timestamptz,
                UNIQUE (namespace, name)
            );

            CREATE TABLE IF NOT EXISTS migrations.log (
                id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
                migration_name text NOT NULL,
                action text NOT NULL,
                status text NOT NULL,
                duration_ms bigint NOT NULL DEFAULT 0,
                error text,
                executed_at timestamptz NOT NULL DEFAULT now()
            );
        "#;

        self.admin
            .execute_with_admin(async move |conn| {
                sqlx::raw_sql(TRACKING_DDL).execute(conn).await?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn read_state(&self) -> Result<(i64, bool), MigrationError> {
        let state = self
            .admin
            .execute_with_admin(async move |conn| {
                let row = sqlx::query_as::<_, (i64, bool)>(
                    "SELECT version, dirty FROM migrations.fluxbase LIMIT 1",
                )
                .fetch_optional(&mut *conn)
                .await?;

                match row {
                    Some(state) => Ok(state),
                    None => {
                        sqlx::query(
                            "INSERT INTO migrations.fluxbase (version, dirty) VALUES (0, false)",
                        )
                        .execute(&mut *conn)
                        .await?;
                        Ok((0, false))
                    }
                }
            })
            .await?;
        Ok(state)
    }

    async fn write_state(&self, version: i64, dirty: bool) -> Result<(), MigrationError> {
        self.admin
            .execute_with_admin(async move |conn| {
                sqlx::query("UPDATE migrations.fluxbase SET version = $1, dirty = $2")
                    .bind(version)
                    .bind(dirty)
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
