//! User (filesystem) migrations.
//!
//! Files are paired `.up.sql`/`.down.sql` by basename and applied in
//! lexicographic order, so zero-padded prefixes sort naturally. Each
//! migration runs in its own admin transaction; every attempt leaves a row
//! in the execution log.

use crate::error::MigrationError;
use fluxbase_db::AdminExecutor;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

/// One migration read from disk.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    /// Basename without the `.up.sql` suffix, e.g. `0001_create_posts`.
    pub name: String,
    pub up_sql: String,
    pub down_sql: Option<String>,
}

/// Pair a directory listing into `(basename, has_down)` entries plus the
/// basenames skipped for having only a down file.
pub fn pair_basenames(file_names: &[String]) -> (Vec<(String, bool)>, Vec<String>) {
    let mut ups: BTreeSet<String> = BTreeSet::new();
    let mut downs: BTreeSet<String> = BTreeSet::new();

    for file in file_names {
        if let Some(base) = file.strip_suffix(".up.sql") {
            ups.insert(base.to_string());
        } else if let Some(base) = file.strip_suffix(".down.sql") {
            downs.insert(base.to_string());
        }
    }

    let paired = ups
        .iter()
        .map(|base| (base.clone(), downs.contains(base)))
        .collect();
    let skipped = downs.difference(&ups).cloned().collect();
    (paired, skipped)
}

/// Read and pair all migrations in `dir`, ordered by basename.
pub fn scan_dir(dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "migration directory does not exist, skipping");
        return Ok(Vec::new());
    }

    let mut file_names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            file_names.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    let (paired, skipped) = pair_basenames(&file_names);
    for base in &skipped {
        tracing::warn!(migration = %base, "down file without up file, skipping");
    }

    let mut migrations = Vec::new();
    for (base, has_down) in paired {
        let up_sql = std::fs::read_to_string(dir.join(format!("{base}.up.sql")))?;
        let down_sql = if has_down {
            Some(std::fs::read_to_string(dir.join(format!("{base}.down.sql")))?)
        } else {
            None
        };
        migrations.push(MigrationFile {
            name: base,
            up_sql,
            down_sql,
        });
    }
    Ok(migrations)
}

/// Runner for the filesystem namespace.
pub struct UserMigrator<'a> {
    admin: &'a AdminExecutor,
}

impl<'a> UserMigrator<'a> {
    pub fn new(admin: &'a AdminExecutor) -> Self {
        Self { admin }
    }

    /// Apply every unapplied migration in `dir`.
    pub async fn run(&self, dir: &Path) -> Result<(), MigrationError> {
        let migrations = scan_dir(dir)?;
        if migrations.is_empty() {
            return Ok(());
        }

        let applied = self.applied_names().await?;

        for migration in migrations {
            if applied.contains(&migration.name) {
                continue;
            }
            self.apply(&migration).await?;
        }
        Ok(())
    }

    async fn applied_names(&self) -> Result<Vec<String>, MigrationError> {
        let names = self
            .admin
            .execute_with_admin(async move |conn| {
                let rows = sqlx::query_as::<_, (String,)>(
                    "SELECT name FROM migrations.app \
                     WHERE namespace = 'filesystem' AND status = 'applied'",
                )
                .fetch_all(&mut *conn)
                .await?;
                Ok(rows.into_iter().map(|(name,)| name).collect::<Vec<_>>())
            })
            .await?;
        Ok(names)
    }

    async fn apply(&self, migration: &MigrationFile) -> Result<(), MigrationError> {
        tracing::info!(migration = %migration.name, "applying user migration");
        let started = Instant::now();

        let name = migration.name.clone();
        let up_sql = migration.up_sql.clone();
        let down_sql = migration.down_sql.clone();

        let result = self
            .admin
            .execute_with_admin(async move |conn| {
                sqlx::query(
                    "INSERT INTO migrations.app (namespace, name, up_sql, down_sql, status, applied_at) \
                     VALUES ('filesystem', $1, $2, $3, 'applied', now()) \
                     ON CONFLICT (namespace, name) DO UPDATE \
                     SET up_sql = EXCLUDED.up_sql, \
                         down_sql = EXCLUDED.down_sql, \
                         status = 'applied', \
                         applied_at = now()",
                )
                .bind(&name)
                .bind(&up_sql)
                .bind(&down_sql)
                .execute(&mut *conn)
                .await?;

                sqlx::raw_sql(&up_sql).execute(conn).await?;
                Ok(())
            })
            .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        match result {
            Ok(()) => {
                self.log_execution(&migration.name, "up", "success", duration_ms, None)
                    .await?;
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.log_execution(&migration.name, "up", "failed", duration_ms, Some(&message))
                    .await?;
                Err(MigrationError::Failed {
                    name: migration.name.clone(),
                    message,
                })
            }
        }
    }

    async fn log_execution(
        &self,
        name: &str,
        action: &str,
        status: &str,
        duration_ms: i64,
        error: Option<&str>,
    ) -> Result<(), MigrationError> {
        let name = name.to_string();
        let action = action.to_string();
        let status = status.to_string();
        let error = error.map(|e| e.to_string());

        self.admin
            .execute_with_admin(async move |conn| {
                sqlx::query(
                    "INSERT INTO migrations.log (migration_name, action, status, duration_ms, error) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&name)
                .bind(&action)
                .bind(&status)
                .bind(duration_ms)
                .bind(&error)
                .execute(&mut *conn)
                .await?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pairs_up_and_down() {
        let (paired, skipped) = pair_basenames(&names(&[
            "0001_users.up.sql",
            "0001_users.down.sql",
            "0002_posts.up.sql",
        ]));
        assert_eq!(
            paired,
            vec![
                ("0001_users".to_string(), true),
                ("0002_posts".to_string(), false),
            ]
        );
        assert!(skipped.is_empty());
    }

    #[test]
    fn down_without_up_is_skipped() {
        let (paired, skipped) =
            pair_basenames(&names(&["0001_a.up.sql", "0002_orphan.down.sql"]));
        assert_eq!(paired, vec![("0001_a".to_string(), false)]);
        assert_eq!(skipped, vec!["0002_orphan".to_string()]);
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let (paired, skipped) =
            pair_basenames(&names(&["README.md", "0001_a.up.sql", "notes.sql"]));
        assert_eq!(paired, vec![("0001_a".to_string(), false)]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let (paired, _) = pair_basenames(&names(&[
            "0010_z.up.sql",
            "0002_b.up.sql",
            "0001_a.up.sql",
        ]));
        let order: Vec<&str> = paired.iter().map(|(b, _)| b.as_str()).collect();
        assert_eq!(order, vec!["0001_a", "0002_b", "0010_z"]);
    }

    #[test]
    fn scan_missing_dir_is_empty() {
        let migrations = scan_dir(Path::new("/nonexistent/fluxbase-migrations")).unwrap();
        assert!(migrations.is_empty());
    }

    #[test]
    fn scan_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001_a.up.sql"), "CREATE TABLE a (id int);").unwrap();
        std::fs::write(dir.path().join("0001_a.down.sql"), "DROP TABLE a;").unwrap();
        std::fs::write(dir.path().join("0002_b.up.sql"), "CREATE TABLE b (id int);").unwrap();

        let migrations = scan_dir(dir.path()).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].name, "0001_a");
        assert!(migrations[0].up_sql.contains("CREATE TABLE a"));
        assert_eq!(migrations[0].down_sql.as_deref(), Some("DROP TABLE a;"));
        assert!(migrations[1].down_sql.is_none());
    }
}
