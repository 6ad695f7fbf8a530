use std::io;
use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "fleetbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "fleetbook_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations stored.
pub const RESERVATIONS_CREATED_TOTAL: &str = "fleetbook_reservations_created_total";

/// Counter: bookings refused by validation. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "fleetbook_reservations_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "fleetbook_connections_active";

pub const CONNECTIONS_TOTAL: &str = "fleetbook_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "fleetbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetbook_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetbook_wal_flush_batch_size";

pub const WAL_COMPACTIONS_TOTAL: &str = "fleetbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(io::Error::other)?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCategory { .. } => "insert_category",
        Command::UpdateCategory { .. } => "update_category",
        Command::DeleteCategory { .. } => "delete_category",
        Command::InsertVehicle { .. } => "insert_vehicle",
        Command::UpdateVehicle { .. } => "update_vehicle",
        Command::DeleteVehicle { .. } => "delete_vehicle",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::RescheduleReservation { .. } => "reschedule_reservation",
        Command::TransitionReservation { .. } => "transition_reservation",
        Command::SelectCategories { .. } => "select_categories",
        Command::SelectVehicles { .. } => "select_vehicles",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectDashboard => "select_dashboard",
        Command::SelectTopVehicles => "select_top_vehicles",
        Command::SelectMonthlyRevenue => "select_monthly_revenue",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
