use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "consultd_operations_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "consultd_operation_duration_seconds";

/// Counter: booking attempts rejected for overlap. Labels: scope.
pub const BOOKING_CONFLICTS_TOTAL: &str = "consultd_booking_conflicts_total";

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "consultd_bookings_created_total";

// ── Cache ───────────────────────────────────────────────────────

pub const SLOT_CACHE_HITS_TOTAL: &str = "consultd_slot_cache_hits_total";
pub const SLOT_CACHE_MISSES_TOTAL: &str = "consultd_slot_cache_misses_total";

// ── Reconciliation worker ───────────────────────────────────────

/// Counter: bookings a reminder was delivered for.
pub const REMINDERS_SENT_TOTAL: &str = "consultd_reminders_sent_total";

/// Counter: pending bookings moved to missed.
pub const BOOKINGS_EXPIRED_TOTAL: &str = "consultd_bookings_expired_total";

/// Counter: ledger entries removed by retention.
pub const NOTIFICATIONS_PURGED_TOTAL: &str = "consultd_notifications_purged_total";

/// Counter: per-item failures inside a worker pass. Labels: pass.
pub const WORKER_FAILURES_TOTAL: &str = "consultd_worker_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "consultd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "consultd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Outcome label for an operation result.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    }
}

/// Record count + latency for one engine operation.
pub fn record_operation<T>(
    op: &'static str,
    started: std::time::Instant,
    result: &Result<T, EngineError>,
) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome_label(result))
        .increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
