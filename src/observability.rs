use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total wire requests. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "headcount_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "headcount_request_duration_seconds";

/// Counter: admissions refused because the slot was full.
pub const CAPACITY_REJECTIONS_TOTAL: &str = "headcount_capacity_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "headcount_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "headcount_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "headcount_connections_rejected_total";

/// Gauge: slot entries currently in the store.
pub const SLOTS_ACTIVE: &str = "headcount_slots_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "headcount_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "headcount_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::CreateBooking { .. } => "create_booking",
        Request::UpdateBooking { .. } => "update_booking",
        Request::SetStatus { .. } => "set_status",
        Request::DeleteBooking { .. } => "delete_booking",
        Request::GetBooking { .. } => "get_booking",
        Request::ListBookings { .. } => "list_bookings",
        Request::Occupancy { .. } => "occupancy",
        Request::MonthlyReport { .. } => "monthly_report",
        Request::RevenueByDay { .. } => "revenue_by_day",
        Request::Watch { .. } => "watch",
        Request::Unwatch => "unwatch",
    }
}
