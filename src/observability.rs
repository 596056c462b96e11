use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "fairslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "fairslot_query_duration_seconds";

// ── Scheduling outcomes ─────────────────────────────────────────

/// Counter: bookings refused by the availability check. Labels: reason.
pub const BOOKING_CONFLICTS_TOTAL: &str = "fairslot_booking_conflicts_total";

/// Counter: bookings that passed the check but lost the instant to a
/// concurrent writer.
pub const STORAGE_RACES_TOTAL: &str = "fairslot_storage_races_total";

/// Counter: fairness cycles closed (all active counters reset).
pub const CYCLE_RESETS_TOTAL: &str = "fairslot_cycle_resets_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "fairslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "fairslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "fairslot_connections_rejected_total";

/// Gauge: number of loaded organisations (engines).
pub const TENANTS_ACTIVE: &str = "fairslot_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fairslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fairslot_wal_flush_batch_size";

/// Counter: WAL rewrites performed by the compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "fairslot_wal_compactions_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSalesperson { .. } => "insert_salesperson",
        Command::UpdateSalesperson { .. } => "update_salesperson",
        Command::DeleteSalesperson { .. } => "delete_salesperson",
        Command::InsertRule { .. } => "insert_rule",
        Command::DeleteRule { .. } => "delete_rule",
        Command::InsertBlackout { .. } => "insert_blackout",
        Command::DeleteBlackout { .. } => "delete_blackout",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::RescheduleAppointment { .. } => "reschedule_appointment",
        Command::CompleteAppointment { .. } => "complete_appointment",
        Command::CancelAppointment { .. } => "cancel_appointment",
        Command::SetUtcOffset { .. } => "set_utc_offset",
        Command::SelectSalespeople => "select_salespeople",
        Command::SelectRules { .. } => "select_rules",
        Command::SelectBlackouts { .. } => "select_blackouts",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectNextSalesperson => "select_next_salesperson",
    }
}
