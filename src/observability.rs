use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "reslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "reslot_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: availability computations. Labels: outcome.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "reslot_availability_queries_total";

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "reslot_bookings_created_total";

/// Counter: committed cancellations and reschedules. Labels: kind.
pub const BOOKING_MUTATIONS_TOTAL: &str = "reslot_booking_mutations_total";

/// Counter: identity challenges issued. Labels: status.
pub const CHALLENGES_ISSUED_TOTAL: &str = "reslot_challenges_issued_total";

/// Counter: code verification attempts. Labels: outcome.
pub const CHALLENGE_VERIFICATIONS_TOTAL: &str = "reslot_challenge_verifications_total";

/// Counter: challenges, tokens and waitlist entries removed by the reaper.
/// Labels: kind.
pub const REAPED_TOTAL: &str = "reslot_reaped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "reslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "reslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reslot_connections_rejected_total";

/// Gauge: live per-date commit locks.
pub const DATE_LOCKS_ACTIVE: &str = "reslot_date_locks_active";

/// Histogram: journal append + fsync duration in seconds.
pub const JOURNAL_APPEND_DURATION_SECONDS: &str = "reslot_journal_append_duration_seconds";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBusiness { .. } => "insert_business",
        Command::InsertHours { .. } => "insert_hours",
        Command::DeleteHours { .. } => "delete_hours",
        Command::InsertService { .. } => "insert_service",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertWaitlist { .. } => "insert_waitlist",
        Command::InsertChallenge { .. } => "insert_challenge",
        Command::InsertReschedule { .. } => "insert_reschedule",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectBusinesses => "select_businesses",
        Command::SelectServices { .. } => "select_services",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectWaitlist { .. } => "select_waitlist",
        Command::SelectVerification { .. } => "select_verification",
    }
}
