//! TTL cache over the schema inspector.
//!
//! The snapshot is an immutable value behind an `Arc`; refresh does all of
//! its I/O without holding the lock and swaps the reference at the end, so
//! concurrent readers keep serving the previous snapshot until the swap.

use crate::inspector::{SchemaLoad, SchemaSource};
use crate::model::{FunctionDescriptor, RelationKind, TableDescriptor};
use chrono::{DateTime, Utc};
use fluxbase_core::pubsub::InvalidationBus;
use fluxbase_db::DbError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Pub/sub channel carrying cluster-wide invalidations.
pub const INVALIDATION_CHANNEL: &str = "schema_cache";

/// Payload published on invalidation.
pub const INVALIDATION_PAYLOAD: &str = "invalidate";

/// One immutable view of the database schema.
#[derive(Debug)]
pub struct SchemaSnapshot {
    pub tables: HashMap<String, TableDescriptor>,
    pub views: HashMap<String, TableDescriptor>,
    pub matviews: HashMap<String, TableDescriptor>,
    pub functions: HashMap<String, FunctionDescriptor>,
    pub schemas: Vec<String>,
    pub last_refresh: DateTime<Utc>,
    refreshed_at: Option<Instant>,
}

impl SchemaSnapshot {
    fn empty() -> Self {
        Self {
            tables: HashMap::new(),
            views: HashMap::new(),
            matviews: HashMap::new(),
            functions: HashMap::new(),
            schemas: Vec::new(),
            last_refresh: DateTime::<Utc>::MIN_UTC,
            refreshed_at: None,
        }
    }

    fn from_load(load: SchemaLoad) -> Self {
        Self {
            tables: load.tables.into_iter().map(|t| (t.key(), t)).collect(),
            views: load.views.into_iter().map(|t| (t.key(), t)).collect(),
            matviews: load.matviews.into_iter().map(|t| (t.key(), t)).collect(),
            functions: load.functions.into_iter().map(|f| (f.key(), f)).collect(),
            schemas: load.schemas,
            last_refresh: Utc::now(),
            refreshed_at: Some(Instant::now()),
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        match self.refreshed_at {
            Some(at) => at.elapsed() > ttl,
            None => true,
        }
    }
}

/// The process-wide schema cache.
pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    schemas: Vec<String>,
    ttl: Duration,
    snapshot: RwLock<Arc<SchemaSnapshot>>,
    stale: AtomicBool,
    // Single-flight guard: concurrent readers that all observe a stale
    // snapshot refresh once, not once each.
    refresh_guard: tokio::sync::Mutex<()>,
}

impl SchemaCache {
    /// Create a cache that starts stale, so the first read loads.
    pub fn new(source: Arc<dyn SchemaSource>, schemas: Vec<String>, ttl: Duration) -> Self {
        Self {
            source,
            schemas,
            ttl,
            snapshot: RwLock::new(Arc::new(SchemaSnapshot::empty())),
            stale: AtomicBool::new(true),
            refresh_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Current snapshot, refreshing first when stale or expired.
    pub async fn snapshot(&self) -> Result<Arc<SchemaSnapshot>, DbError> {
        if self.needs_refresh() {
            self.refresh().await?;
        }
        Ok(self.current())
    }

    /// The snapshot as-is, without freshness checks.
    pub fn current(&self) -> Arc<SchemaSnapshot> {
        self.snapshot.read().expect("schema cache lock poisoned").clone()
    }

    fn needs_refresh(&self) -> bool {
        self.stale.load(Ordering::Acquire) || self.current().expired(self.ttl)
    }

    /// Rebuild the snapshot from the source and swap it in.
    ///
    /// All inspector I/O happens before the write lock is taken; a failed
    /// load leaves the previous snapshot (and the stale flag) in place.
    pub async fn refresh(&self) -> Result<(), DbError> {
        let _guard = self.refresh_guard.lock().await;
        if !self.needs_refresh() {
            // Another caller refreshed while we waited.
            return Ok(());
        }

        let load = self.source.load(&self.schemas).await?;
        let next = Arc::new(SchemaSnapshot::from_load(load));

        {
            let mut slot = self.snapshot.write().expect("schema cache lock poisoned");
            *slot = next;
        }
        self.stale.store(false, Ordering::Release);
        tracing::debug!("schema cache refreshed");
        Ok(())
    }

    /// Mark the local snapshot stale; the next reader refreshes.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Invalidate locally and broadcast to every other instance.
    pub async fn invalidate_all(&self, bus: &dyn InvalidationBus) -> anyhow::Result<()> {
        self.invalidate();
        bus.publish(INVALIDATION_CHANNEL, INVALIDATION_PAYLOAD).await
    }

    /// Run the cluster invalidation listener until `shutdown` flips.
    ///
    /// Remote `invalidate` messages mark the local snapshot stale; the
    /// subsequent read refreshes it.
    pub async fn listen_for_invalidations(
        self: Arc<Self>,
        bus: Arc<dyn InvalidationBus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut subscription = bus.subscribe(INVALIDATION_CHANNEL).await?;
        loop {
            tokio::select! {
                message = subscription.recv() => {
                    match message {
                        Some(payload) if payload == INVALIDATION_PAYLOAD => {
                            tracing::debug!("schema cache invalidated by peer");
                            self.invalidate();
                        }
                        Some(other) => {
                            tracing::debug!(payload = %other, "ignoring unknown cache message");
                        }
                        None => return Ok(()),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Look up a table by schema and name.
    pub async fn get_table(&self, schema: &str, name: &str) -> Result<Option<TableDescriptor>, DbError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.tables.get(&format!("{schema}.{name}")).cloned())
    }

    /// Look up any relation kind by schema and name.
    pub async fn get_relation(
        &self,
        schema: &str,
        name: &str,
    ) -> Result<Option<TableDescriptor>, DbError> {
        let snapshot = self.snapshot().await?;
        let key = format!("{schema}.{name}");
        Ok(snapshot
            .tables
            .get(&key)
            .or_else(|| snapshot.views.get(&key))
            .or_else(|| snapshot.matviews.get(&key))
            .cloned())
    }

    /// All tables, ordered by key.
    pub async fn get_tables(&self) -> Result<Vec<TableDescriptor>, DbError> {
        let snapshot = self.snapshot().await?;
        Ok(sorted_values(&snapshot.tables))
    }

    /// All views, ordered by key.
    pub async fn get_views(&self) -> Result<Vec<TableDescriptor>, DbError> {
        let snapshot = self.snapshot().await?;
        Ok(sorted_values(&snapshot.views))
    }

    /// All materialized views, ordered by key.
    pub async fn get_matviews(&self) -> Result<Vec<TableDescriptor>, DbError> {
        let snapshot = self.snapshot().await?;
        Ok(sorted_values(&snapshot.matviews))
    }

    /// All functions, ordered by key.
    pub async fn get_functions(&self) -> Result<Vec<FunctionDescriptor>, DbError> {
        let snapshot = self.snapshot().await?;
        let mut functions: Vec<_> = snapshot.functions.values().cloned().collect();
        functions.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(functions)
    }

    /// Schemas covered by the snapshot.
    pub async fn schemas(&self) -> Result<Vec<String>, DbError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.schemas.clone())
    }

    /// Only plain tables accept writes; views and matviews are read-only.
    pub async fn is_writable(&self, schema: &str, name: &str) -> Result<bool, DbError> {
        let relation = self.get_relation(schema, name).await?;
        Ok(relation
            .map(|r| r.kind == RelationKind::Table)
            .unwrap_or(false))
    }
}

fn sorted_values(map: &HashMap<String, TableDescriptor>) -> Vec<TableDescriptor> {
    let mut values: Vec<_> = map.values().cloned().collect();
    values.sort_by(|a, b| a.key().cmp(&b.key()));
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct StubSource {
        loads: AtomicUsize,
        fail: AtomicBool,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }

        fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SchemaSource for StubSource {
        async fn load(&self, _schemas: &[String]) -> Result<SchemaLoad, DbError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(DbError::HealthTimeout);
            }
            let mut table =
                TableDescriptor::new("public", format!("gen{n}"), RelationKind::Table);
            table.set_columns(Vec::new());
            let view = TableDescriptor::new("public", "report", RelationKind::View);
            Ok(SchemaLoad {
                schemas: vec!["public".to_string()],
                tables: vec![table],
                views: vec![view],
                matviews: Vec::new(),
                functions: Vec::new(),
            })
        }
    }

    fn cache_with(source: Arc<StubSource>) -> SchemaCache {
        SchemaCache::new(source, vec!["public".to_string()], Duration::from_secs(300))
    }

    #[tokio::test]
    async fn first_read_loads() {
        let source = Arc::new(StubSource::new());
        let cache = cache_with(source.clone());
        assert_eq!(source.load_count(), 0);
        let tables = cache.get_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(source.load_count(), 1);
    }

    #[tokio::test]
    async fn fresh_reads_do_not_reload() {
        let source = Arc::new(StubSource::new());
        let cache = cache_with(source.clone());
        cache.get_tables().await.unwrap();
        cache.get_views().await.unwrap();
        cache.get_table("public", "gen1").await.unwrap();
        assert_eq!(source.load_count(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let source = Arc::new(StubSource::new());
        let cache = cache_with(source.clone());
        cache.get_tables().await.unwrap();
        cache.invalidate();
        let tables = cache.get_tables().await.unwrap();
        assert_eq!(source.load_count(), 2);
        // The new snapshot replaced the old one.
        assert_eq!(tables[0].name, "gen2");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let source = Arc::new(StubSource::new());
        let cache = cache_with(source.clone());
        cache.get_tables().await.unwrap();

        source.fail.store(true, Ordering::SeqCst);
        cache.invalidate();
        assert!(cache.get_tables().await.is_err());

        // Old snapshot still served without freshness check.
        let snapshot = cache.current();
        assert_eq!(snapshot.tables.len(), 1);

        // Once the source recovers, the next read refreshes.
        source.fail.store(false, Ordering::SeqCst);
        let tables = cache.get_tables().await.unwrap();
        assert_eq!(tables[0].name, "gen3");
    }

    #[tokio::test]
    async fn is_writable_only_for_tables() {
        let source = Arc::new(StubSource::new());
        let cache = cache_with(source);
        assert!(cache.is_writable("public", "gen1").await.unwrap());
        assert!(!cache.is_writable("public", "report").await.unwrap());
        assert!(!cache.is_writable("public", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn views_have_no_keys() {
        let source = Arc::new(StubSource::new());
        let cache = cache_with(source);
        let views = cache.get_views().await.unwrap();
        assert!(views.iter().all(|v| v.primary_key.is_empty()));
        assert!(views.iter().all(|v| v.foreign_keys.is_empty()));
    }

    #[tokio::test]
    async fn peer_invalidation_marks_stale() {
        use fluxbase_core::pubsub::LocalBus;

        let source = Arc::new(StubSource::new());
        let cache = Arc::new(cache_with(source.clone()));
        let bus: Arc<dyn InvalidationBus> = Arc::new(LocalBus::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = tokio::spawn(
            cache.clone().listen_for_invalidations(bus.clone(), shutdown_rx),
        );
        // Give the listener a chance to subscribe before publishing.
        tokio::task::yield_now().await;

        cache.get_tables().await.unwrap();
        assert_eq!(source.load_count(), 1);

        bus.publish(INVALIDATION_CHANNEL, INVALIDATION_PAYLOAD)
            .await
            .unwrap();
        // Wait for the listener to process the message.
        for _ in 0..100 {
            if cache.needs_refresh() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.needs_refresh());

        cache.get_tables().await.unwrap();
        assert_eq!(source.load_count(), 2);

        shutdown_tx.send(true).unwrap();
        listener.await.unwrap().unwrap();
    }
}
