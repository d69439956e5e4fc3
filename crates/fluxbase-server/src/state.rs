//! Shared application state.

use fluxbase_core::config::FluxbaseConfig;
use fluxbase_core::pubsub::InvalidationBus;
use fluxbase_db::{DatabaseAccess, PgNotifyBus};
use fluxbase_migrate::Migrator;
use fluxbase_realtime::Dispatcher;
use fluxbase_schema::{SchemaCache, SchemaInspector};
use fluxbase_webhooks::WebhookService;
use std::sync::Arc;

/// Everything the handlers and background tasks share.
pub struct AppState {
    pub config: FluxbaseConfig,
    pub db: DatabaseAccess,
    pub bus: Arc<dyn InvalidationBus>,
    pub cache: Arc<SchemaCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub webhooks: Arc<WebhookService>,
}

impl AppState {
    /// Connect, migrate, and build all services.
    ///
    /// Runs the startup ordering: system migrations, user migrations, role
    /// grants, then a cluster-wide cache invalidation so every instance
    /// picks up whatever the migrations changed.
    pub async fn init(config: &FluxbaseConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let db = DatabaseAccess::connect(&config.database).await?;

        Migrator::new(db.admin(), &config.migrations.user_dir)
            .run_all()
            .await?;

        let bus: Arc<dyn InvalidationBus> =
            Arc::new(PgNotifyBus::new(db.runtime().pool().clone()));

        let inspector = SchemaInspector::new(db.runtime().pool().clone());
        let cache = Arc::new(SchemaCache::new(
            Arc::new(inspector),
            config.schema_cache.schemas.clone(),
            config.schema_cache.ttl(),
        ));
        cache.invalidate_all(bus.as_ref()).await?;

        let dispatcher = Arc::new(Dispatcher::new(config.realtime.channel_buffer));
        let webhooks = Arc::new(WebhookService::new(
            db.runtime().clone(),
            config.webhooks.clone(),
        ));

        // Re-attach change triggers for every enabled webhook; configs may
        // predate this instance.
        let configured = webhooks.repo().list().await?;
        fluxbase_webhooks::trigger::sync_triggers(db.admin(), &configured).await?;

        Ok(Self {
            config: config.clone(),
            db,
            bus,
            cache,
            dispatcher,
            webhooks,
        })
    }
}
