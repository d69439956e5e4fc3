//! Installation of row-change triggers on watched tables.
//!
//! The trigger function itself ships with the system migrations; attaching
//! it to a table is configuration-driven DDL that runs through the admin
//! executor whenever webhook configs change or at startup.

use crate::error::WebhookError;
use crate::model::Webhook;
use fluxbase_db::{quote_ident, AdminExecutor};
use std::collections::BTreeSet;

/// Name of the trigger attached to every watched table.
const TRIGGER_NAME: &str = "fluxbase_webhook_events";

/// Split a watched-table spec into `(schema, table)`; a bare table name
/// means `public`.
pub fn parse_watched_table(spec: &str) -> Option<(String, String)> {
    let spec = spec.trim();
    if spec.is_empty() {
        return None;
    }
    match spec.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
            Some((schema.to_string(), table.to_string()))
        }
        Some(_) => None,
        None => Some(("public".to_string(), spec.to_string())),
    }
}

/// The DDL pair that (re)attaches the trigger to one table.
pub fn trigger_ddl(schema: &str, table: &str) -> (String, String) {
    let target = format!("{}.{}", quote_ident(schema), quote_ident(table));
    let drop = format!("DROP TRIGGER IF EXISTS {TRIGGER_NAME} ON {target}");
    let create = format!(
        "CREATE TRIGGER {TRIGGER_NAME} \
         AFTER INSERT OR UPDATE OR DELETE ON {target} \
         FOR EACH ROW EXECUTE FUNCTION auth.webhook_event_trigger()"
    );
    (drop, create)
}

/// Attach the change trigger to one table, replacing any previous copy.
pub async fn ensure_change_trigger(
    admin: &AdminExecutor,
    schema: &str,
    table: &str,
) -> Result<(), WebhookError> {
    let (drop, create) = trigger_ddl(schema, table);
    admin
        .execute_with_admin(move |conn| {
            Box::pin(async move {
                sqlx::query(&drop).execute(&mut *conn).await?;
                sqlx::query(&create).execute(&mut *conn).await?;
                Ok(())
            })
        })
        .await?;
    tracing::info!(schema, table, "webhook change trigger installed");
    Ok(())
}

/// Install triggers for every table watched by an enabled webhook.
///
/// A table that does not exist yet is a warning, not a failure: its
/// migration may simply not have run in this environment.
pub async fn sync_triggers(
    admin: &AdminExecutor,
    webhooks: &[Webhook],
) -> Result<(), WebhookError> {
    let mut watched: BTreeSet<(String, String)> = BTreeSet::new();
    for webhook in webhooks.iter().filter(|w| w.enabled) {
        for event in webhook.events.0.iter() {
            match parse_watched_table(&event.table) {
                Some(target) => {
                    watched.insert(target);
                }
                None => {
                    tracing::warn!(
                        webhook = %webhook.id,
                        table = %event.table,
                        "skipping malformed watched-table spec"
                    );
                }
            }
        }
    }

    for (schema, table) in watched {
        if let Err(err) = ensure_change_trigger(admin, &schema, &table).await {
            tracing::warn!(
                schema = %schema,
                table = %table,
                error = %err,
                "could not install webhook trigger"
            );
        }
    }
    Ok(())
}
