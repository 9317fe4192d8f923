use std::net::SocketAddr;

// ── RED metrics (action-driven) ─────────────────────────────────

/// Counter: optimistic transitions applied locally. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "tableside_transitions_total";

/// Counter: remote writes settled. Labels: collection, status.
pub const REMOTE_WRITES_TOTAL: &str = "tableside_remote_writes_total";

/// Histogram: remote write latency in seconds, compensation included. Labels: collection.
pub const REMOTE_WRITE_DURATION_SECONDS: &str = "tableside_remote_write_duration_seconds";

/// Counter: local rollbacks applied after a failed write.
pub const ROLLBACKS_TOTAL: &str = "tableside_rollbacks_total";

/// Counter: rollbacks skipped because newer state had already arrived.
pub const ROLLBACKS_DISCARDED_TOTAL: &str = "tableside_rollbacks_discarded_total";

/// Counter: assignments that left table and book inconsistent remotely.
pub const PARTIAL_ASSIGNMENTS_TOTAL: &str = "tableside_partial_assignments_total";

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: change notifications merged. Labels: collection, kind.
pub const NOTIFICATIONS_MERGED_TOTAL: &str = "tableside_notifications_merged_total";

/// Counter: inbound rows dropped as malformed. Labels: collection.
pub const ROWS_DROPPED_TOTAL: &str = "tableside_rows_dropped_total";

/// Counter: full collection re-reads after a lagged subscription. Labels: collection.
pub const RESYNCS_TOTAL: &str = "tableside_resyncs_total";

// ── Sweeper ─────────────────────────────────────────────────────

/// Counter: sweep passes run.
pub const SWEEPS_TOTAL: &str = "tableside_sweeps_total";

/// Counter: reserved tables released as no-shows.
pub const NO_SHOWS_RELEASED_TOTAL: &str = "tableside_no_shows_released_total";

/// Counter: no-show release writes that failed.
pub const SWEEP_WRITE_FAILURES_TOTAL: &str = "tableside_sweep_write_failures_total";

// ── USE metrics (floor state) ───────────────────────────────────

/// Gauge: tables per status. Labels: status.
pub const TABLES: &str = "tableside_tables";

/// Gauge: reservations waiting for a table.
pub const RESERVATIONS_PENDING: &str = "tableside_reservations_pending";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
