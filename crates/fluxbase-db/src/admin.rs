//! On-demand admin sessions for DDL.
//!
//! The admin credential pair never enters the shared pool; each privileged
//! operation gets a fresh connection that is closed on every exit path.

use crate::error::DbError;
use sqlx::{Connection, PgConnection};

/// Executor for the admin credential domain.
pub struct AdminExecutor {
    admin_url: String,
    runtime_user: Option<String>,
    admin_is_runtime: bool,
}

/// Roles granted to the runtime user at startup, when they exist.
const GRANTABLE_ROLES: [&str; 3] = ["anon", "authenticated", "service_role"];

impl AdminExecutor {
    pub fn new(admin_url: String, runtime_user: Option<String>, admin_is_runtime: bool) -> Self {
        Self {
            admin_url,
            runtime_user,
            admin_is_runtime,
        }
    }

    /// Run `f` on a fresh admin connection inside a transaction.
    ///
    /// Commits on success, rolls back on any error, and closes the
    /// connection either way.
    pub async fn execute_with_admin<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: AsyncFnOnce(&mut PgConnection) -> Result<T, DbError>,
    {
        let mut conn = PgConnection::connect(&self.admin_url).await?;

        // Identity is logged, not enforced: some deployments intentionally
        // run with a single credential pair.
        match sqlx::query_as::<_, (String, String)>(
            "SELECT current_user::text, session_user::text",
        )
        .fetch_one(&mut conn)
        .await
        {
            Ok((current, session)) => {
                tracing::debug!(current_user = %current, session_user = %session, "admin session opened");
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not verify admin session identity");
            }
        }

        let result = async {
            sqlx::query("BEGIN").execute(&mut conn).await?;
            match f(&mut conn).await {
                Ok(value) => {
                    sqlx::query("COMMIT").execute(&mut conn).await?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut conn).await {
                        tracing::warn!(error = %rollback_err, "rollback failed after admin error");
                    }
                    Err(err)
                }
            }
        }
        .await;

        if let Err(close_err) = conn.close().await {
            tracing::warn!(error = %close_err, "failed to close admin connection");
        }

        result
    }

    /// Execute a single DDL statement with admin privileges.
    pub async fn exec(&self, statement: &str) -> Result<u64, DbError> {
        let statement = statement.to_string();
        self.execute_with_admin(async move |conn| {
            let result = sqlx::query(&statement).execute(conn).await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Grant the well-known application roles to the runtime user.
    ///
    /// Missing roles are warnings, not failures; skipped entirely when the
    /// runtime and admin identities coincide.
    pub async fn grant_roles_to_runtime_user(&self) -> Result<(), DbError> {
        if self.admin_is_runtime {
            tracing::debug!("runtime user is the admin user, skipping role grants");
            return Ok(());
        }
        let Some(runtime_user) = self.runtime_user.clone() else {
            tracing::warn!("runtime user unknown, skipping role grants");
            return Ok(());
        };

        self.execute_with_admin(async move |conn| {
            for role in GRANTABLE_ROLES {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)",
                )
                .bind(role)
                .fetch_one(&mut *conn)
                .await?;

                if !exists {
                    tracing::warn!(role, "role does not exist, skipping grant");
                    continue;
                }

                let grant = format!(
                    "GRANT {} TO {}",
                    quote_ident(role),
                    quote_ident(&runtime_user)
                );
                sqlx::query(&grant).execute(&mut *conn).await?;
                tracing::info!(role, user = %runtime_user, "granted role to runtime user");
            }
            Ok(())
        })
        .await
    }
}

/// Quote a Postgres identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_plain_identifier() {
        assert_eq!(quote_ident("service_role"), "\"service_role\"");
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn grantable_roles_are_fixed() {
        assert_eq!(GRANTABLE_ROLES, ["anon", "authenticated", "service_role"]);
    }
}
