use std::net::SocketAddr;

use axum::extract::MatchedPath;
use axum::http::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests served. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "daybook_requests_total";

/// Histogram: request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "daybook_request_duration_seconds";

/// Counter: reservation attempts. Labels: outcome (reserved, rejected).
pub const RESERVATIONS_TOTAL: &str = "daybook_reservations_total";

/// Counter: confirmation attempts. Labels: outcome (confirmed, rejected).
pub const CONFIRMATIONS_TOTAL: &str = "daybook_confirmations_total";

// ── Background jobs ─────────────────────────────────────────────

/// Counter: availability rows created by replenishment.
pub const REPLENISH_ROWS_INSERTED_TOTAL: &str = "daybook_replenish_rows_inserted_total";

/// Counter: products whose replenishment failed.
pub const REPLENISH_FAILURES_TOTAL: &str = "daybook_replenish_failures_total";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "daybook_wal_compactions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "daybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "daybook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Route template for metric labels, so `/bookings/{id}` doesn't explode
/// cardinality. Unmatched requests share one label.
pub fn route_label<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}
