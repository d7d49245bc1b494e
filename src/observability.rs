use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "seatline_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "seatline_query_duration_seconds";

/// Counter: booking requests. Labels: outcome (`created`, `replayed` or an error code).
pub const BOOKINGS_TOTAL: &str = "seatline_bookings_total";

/// Counter: requests answered from an existing idempotency binding.
pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "seatline_idempotent_replays_total";

pub const CANCELLATIONS_TOTAL: &str = "seatline_cancellations_total";

/// Histogram: time spent waiting for a slot's booking queue, in seconds.
pub const BOOKING_QUEUE_WAIT_SECONDS: &str = "seatline_booking_queue_wait_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "seatline_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "seatline_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "seatline_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "seatline_tenants_active";

/// Gauge: per-slot booking queues currently held in memory.
pub const LOCK_QUEUES_ACTIVE: &str = "seatline_lock_queues_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatline_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRestaurant(_) => "insert_restaurant",
        Command::InsertSector(_) => "insert_sector",
        Command::InsertTable(_) => "insert_table",
        Command::InsertReservation(_) => "insert_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectFloorPlan { .. } => "select_floor_plan",
        Command::SelectRestaurants => "select_restaurants",
        Command::SelectSectors { .. } => "select_sectors",
    }
}
