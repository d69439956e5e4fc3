//! Per-operation query metrics.

use std::time::Duration;

/// Sink for query observations.
///
/// One record per executor operation: the inferred operation kind, the
/// inferred table, the wall-clock duration, and the error message on failure.
pub trait QueryMetrics: Send + Sync {
    fn record(&self, operation: &str, table: &str, duration: Duration, error: Option<&str>);
}

/// Default sink that emits structured tracing events.
#[derive(Default)]
pub struct TracingMetrics;

impl QueryMetrics for TracingMetrics {
    fn record(&self, operation: &str, table: &str, duration: Duration, error: Option<&str>) {
        match error {
            Some(err) => tracing::debug!(
                operation,
                table,
                duration_ms = duration.as_millis() as u64,
                error = err,
                "query failed"
            ),
            None => tracing::trace!(
                operation,
                table,
                duration_ms = duration.as_millis() as u64,
                "query completed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Captures observations for assertions.
    #[derive(Default)]
    struct CapturingMetrics {
        records: Mutex<Vec<(String, String, Duration, Option<String>)>>,
    }

    impl QueryMetrics for CapturingMetrics {
        fn record(&self, operation: &str, table: &str, duration: Duration, error: Option<&str>) {
            self.records.lock().unwrap().push((
                operation.to_string(),
                table.to_string(),
                duration,
                error.map(|e| e.to_string()),
            ));
        }
    }

    #[test]
    fn sink_receives_observations() {
        let metrics = CapturingMetrics::default();
        metrics.record("select", "users", Duration::from_millis(12), None);
        metrics.record("insert", "orders", Duration::from_millis(3), Some("boom"));

        let records = metrics.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "select");
        assert_eq!(records[1].3.as_deref(), Some("boom"));
    }
}
