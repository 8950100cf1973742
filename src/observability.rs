use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "seatledger_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "seatledger_query_duration_seconds";

// ── Ledger metrics ──────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (confirmed, unavailable, transient, rejected).
pub const RESERVATIONS_TOTAL: &str = "seatledger_reservations_total";

/// Counter: reserve attempts repeated after a version conflict or storage error.
pub const RESERVE_RETRIES_TOTAL: &str = "seatledger_reserve_retries_total";

/// Counter: bookings refunded by their holder.
pub const CANCELLATIONS_TOTAL: &str = "seatledger_cancellations_total";

/// Counter: seats found held by more than one confirmed booking.
pub const INVARIANT_VIOLATIONS_TOTAL: &str = "seatledger_invariant_violations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "seatledger_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "seatledger_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "seatledger_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatledger_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertEvent { .. } => "insert_event",
        Command::DeleteEvent { .. } => "delete_event",
        Command::SelectEvents => "select_events",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::InsertPayment { .. } => "insert_payment",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSeats { .. } => "select_seats",
        Command::SelectOccupancy { .. } => "select_occupancy",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_per_command() {
        assert_eq!(command_label(&Command::SelectEvents), "select_events");
        assert_eq!(
            command_label(&Command::SelectSeats { event_id: "jazz".into() }),
            "select_seats"
        );
    }

    #[test]
    fn no_port_no_exporter() {
        assert!(init(None).is_ok());
    }
}
