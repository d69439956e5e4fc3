//! Runtime-privilege query executor.
//!
//! One process-wide pool bound to the runtime identity. Every operation is
//! observed (duration, inferred operation/table, error) and slow operations
//! are logged with a truncated statement. Dynamic statements run
//! unprepared so schema changes cannot invalidate a statement cache out
//! from under us.

use crate::error::DbError;
use crate::metrics::{QueryMetrics, TracingMetrics};
use crate::sql;
use fluxbase_core::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Transaction};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Operations slower than this emit a warning.
const SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);

/// Ceiling for the health-check round-trip.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for the per-connection pgvector OID probe.
const VECTOR_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pool usage counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max: u32,
}

/// The shared runtime executor.
#[derive(Clone)]
pub struct Executor {
    pool: PgPool,
    metrics: Arc<dyn QueryMetrics>,
    pgvector_available: Arc<AtomicBool>,
    max_conns: u32,
}

impl Executor {
    /// Build the pool from configuration and connect.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        Self::connect_with_metrics(config, Arc::new(TracingMetrics)).await
    }

    /// Build the pool with a custom metrics sink.
    pub async fn connect_with_metrics(
        config: &DatabaseConfig,
        metrics: Arc<dyn QueryMetrics>,
    ) -> Result<Self, DbError> {
        let pgvector_available = Arc::new(AtomicBool::new(false));
        let probe_flag = pgvector_available.clone();

        let pool = PgPoolOptions::new()
            .max_connections(config.pool.max_conns)
            .min_connections(config.pool.min_conns)
            .max_lifetime(Some(config.pool.max_lifetime()))
            .idle_timeout(Some(config.pool.max_idle()))
            .acquire_timeout(config.pool.acquire_timeout())
            // Liveness probe before every acquire so callers never receive
            // a closed socket.
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                let probe_flag = probe_flag.clone();
                Box::pin(async move {
                    probe_vector_oid(conn, &probe_flag).await;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        Ok(Self {
            pool,
            metrics,
            pgvector_available,
            max_conns: config.pool.max_conns,
        })
    }

    /// The underlying pool, for repositories that bind parameters directly.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Whether the `vector` extension type was found on connect.
    pub fn pgvector_available(&self) -> bool {
        self.pgvector_available.load(Ordering::Relaxed)
    }

    /// Fetch all rows of a dynamic statement.
    pub async fn query(&self, statement: &str) -> Result<Vec<PgRow>, DbError> {
        self.observe(statement, async {
            sqlx::query(statement)
                .persistent(false)
                .fetch_all(&self.pool)
                .await
        })
        .await
    }

    /// Fetch exactly one row.
    pub async fn query_row(&self, statement: &str) -> Result<PgRow, DbError> {
        self.observe(statement, async {
            sqlx::query(statement)
                .persistent(false)
                .fetch_one(&self.pool)
                .await
        })
        .await
    }

    /// Fetch zero or one row.
    pub async fn query_opt(&self, statement: &str) -> Result<Option<PgRow>, DbError> {
        self.observe(statement, async {
            sqlx::query(statement)
                .persistent(false)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    /// Execute a statement, returning the affected row count.
    pub async fn exec(&self, statement: &str) -> Result<u64, DbError> {
        self.observe(statement, async {
            sqlx::query(statement)
                .persistent(false)
                .execute(&self.pool)
                .await
                .map(|r| r.rows_affected())
        })
        .await
    }

    /// Begin a transaction on the runtime identity.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DbError> {
        Ok(self.pool.begin().await?)
    }

    /// Run `f` inside a transaction with `service_role` active.
    ///
    /// The role switch is `SET LOCAL`, so it cannot outlive the transaction.
    /// This is the only sanctioned path around row-level security.
    pub async fn with_service_role<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: for<'c> FnOnce(
            &'c mut sqlx::PgConnection,
        ) -> futures::future::BoxFuture<'c, Result<T, DbError>>,
    {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET LOCAL ROLE service_role")
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::RoleSwitch(e.to_string()))?;
        let value = f(&mut *tx).await?;
        tx.commit().await?;
        Ok(value)
    }

    /// Current pool usage.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.max_conns,
        }
    }

    /// Trivial round-trip with a hard deadline.
    pub async fn health(&self) -> Result<(), DbError> {
        let check = sqlx::query("SELECT 1").persistent(false).execute(&self.pool);
        match tokio::time::timeout(HEALTH_TIMEOUT, check).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(DbError::HealthTimeout),
        }
    }

    /// Close the pool, waiting for borrowed connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Spawn a periodic health check that warns when the database stops
    /// answering. Stops when `shutdown` flips.
    pub fn spawn_health_monitor(
        &self,
        period: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let executor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = executor.health().await {
                            let stats = executor.pool_stats();
                            tracing::warn!(
                                error = %err,
                                pool_size = stats.size,
                                pool_idle = stats.idle,
                                "database health check failed"
                            );
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn observe<T, F>(&self, statement: &str, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let duration = started.elapsed();

        let operation = sql::operation_kind(statement);
        let table = sql::table_name(statement);

        if duration > SLOW_QUERY_THRESHOLD {
            tracing::warn!(
                operation,
                table = %table,
                duration_ms = duration.as_millis() as u64,
                query = %sql::truncate_query(statement),
                "slow query"
            );
        }

        let error_text = result.as_ref().err().map(|e| e.to_string());
        self.metrics
            .record(operation, &table, duration, error_text.as_deref());

        result.map_err(DbError::from)
    }
}

/// Look up the dynamic OID of the `vector` type, if the extension exists.
///
/// Runs under its own short deadline so a wedged catalog lookup cannot
/// poison connection establishment; absence of the extension is expected.
async fn probe_vector_oid(conn: &mut sqlx::PgConnection, flag: &AtomicBool) {
    let lookup = sqlx::query_scalar::<_, sqlx::postgres::types::Oid>(
        "SELECT oid FROM pg_type WHERE typname = 'vector' LIMIT 1",
    )
    .persistent(false)
    .fetch_optional(&mut *conn);

    match tokio::time::timeout(VECTOR_PROBE_TIMEOUT, lookup).await {
        Ok(Ok(Some(oid))) => {
            if !flag.swap(true, Ordering::Relaxed) {
                tracing::debug!(oid = oid.0, "pgvector extension detected");
            }
        }
        Ok(Ok(None)) => {}
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "pgvector probe failed");
        }
        Err(_) => {
            tracing::debug!("pgvector probe timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_stats_serializes() {
        let stats = PoolStats {
            size: 3,
            idle: 2,
            max: 10,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["size"], 3);
        assert_eq!(json["idle"], 2);
        assert_eq!(json["max"], 10);
    }

    #[test]
    fn slow_threshold_is_one_second() {
        assert_eq!(SLOW_QUERY_THRESHOLD, Duration::from_secs(1));
        assert_eq!(HEALTH_TIMEOUT, Duration::from_secs(5));
    }
}
