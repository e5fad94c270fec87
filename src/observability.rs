use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotgrid_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotgrid_query_duration_seconds";

/// Counter: appointments confirmed.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotgrid_bookings_created_total";

/// Counter: bookings rejected by the overlap guard. Labels: kind.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotgrid_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotgrid_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotgrid_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotgrid_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotgrid_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotgrid_wal_flush_batch_size";

/// Counter: compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotgrid_wal_compactions_total";

/// Install the Prometheus exporter on `bind:port`. No-op if port is None.
pub fn init(bind: &str, port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .unwrap_or_else(|_| ([0, 0, 0, 0], port).into());
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::InsertWorkingHours(_) => "insert_working_hours",
        Command::SelectWorkingHours => "select_working_hours",
        Command::InsertBlockedTime { .. } => "insert_blocked_time",
        Command::DeleteBlockedTime { .. } => "delete_blocked_time",
        Command::SelectBlockedTimes { .. } => "select_blocked_times",
        Command::SelectServices => "select_services",
        Command::SelectCustomers { .. } => "select_customers",
        Command::SelectStats => "select_stats",
    }
}
