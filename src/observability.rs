use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::BuildError;

use crate::engine::AvailabilityError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: public operations executed. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "slotwise_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "slotwise_operation_duration_seconds";

/// Counter: bulk operations validated. Labels: action, valid.
pub const BULK_OPERATIONS_VALIDATED_TOTAL: &str = "slotwise_bulk_operations_validated_total";

// ── Cache ───────────────────────────────────────────────────────

/// Counter: cache reads served from cache.
pub const CACHE_HITS_TOTAL: &str = "slotwise_cache_hits_total";

/// Counter: cache reads that fell through to storage.
pub const CACHE_MISSES_TOTAL: &str = "slotwise_cache_misses_total";

/// Counter: cache calls that failed and were degraded. Labels: op.
pub const CACHE_ERRORS_TOTAL: &str = "slotwise_cache_errors_total";

/// Counter: cache calls skipped because the breaker was open.
pub const CACHE_SHORT_CIRCUITS_TOTAL: &str = "slotwise_cache_short_circuits_total";

/// Gauge: breaker state (0 closed, 1 half-open, 2 open).
pub const CACHE_BREAKER_STATE: &str = "slotwise_cache_breaker_state";

/// Counter: verification retries while warming.
pub const CACHE_WARM_RETRIES_TOTAL: &str = "slotwise_cache_warm_retries_total";

/// Counter: warmings that ran out of retries and cached the last snapshot.
pub const CACHE_WARM_EXHAUSTED_TOTAL: &str = "slotwise_cache_warm_exhausted_total";

/// Counter: warmings abandoned because the post-commit storage read failed.
pub const CACHE_WARM_FAILED_TOTAL: &str = "slotwise_cache_warm_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Run one public operation, recording its count and latency.
pub async fn timed<T, F>(operation: &'static str, fut: F) -> Result<T, AvailabilityError>
where
    F: Future<Output = Result<T, AvailabilityError>>,
{
    let start = Instant::now();
    let result = fut.await;
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(start.elapsed().as_secs_f64());
    if let Err(e) = &result
        && matches!(e, AvailabilityError::Repository(_))
    {
        tracing::error!("{operation} failed: {e}");
    }
    result
}
