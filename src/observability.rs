use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "stayd_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "stayd_query_duration_seconds";

// ── Reservation lifecycle ───────────────────────────────────────

/// Counter: reservations persisted and marked reserved.
pub const RESERVATIONS_CREATED_TOTAL: &str = "stayd_reservations_created_total";

/// Counter: reservation attempts rejected. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "stayd_reservations_rejected_total";

/// Counter: charge attempts. Labels: outcome (paid, declined, gateway_unreachable, invalid_amount).
pub const PAYMENTS_TOTAL: &str = "stayd_payments_total";

/// Histogram: payment gateway round trip in seconds.
pub const PAYMENT_DURATION_SECONDS: &str = "stayd_payment_duration_seconds";

/// Counter: reservations released after a failed charge.
pub const PAYMENT_RELEASES_TOTAL: &str = "stayd_payment_releases_total";

/// Counter: reserved flags flipped by the reconciler.
pub const RECONCILE_CHANGES_TOTAL: &str = "stayd_reconcile_changes_total";

/// Counter: per-record reconciler write failures.
pub const RECONCILE_FAILURES_TOTAL: &str = "stayd_reconcile_failures_total";

/// Histogram: duration of one reconciliation pass in seconds.
pub const RECONCILE_DURATION_SECONDS: &str = "stayd_reconcile_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "stayd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "stayd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "stayd_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "stayd_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayd_wal_flush_batch_size";

/// Install the `tracing` subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
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
        Command::InsertProperty(_) => "insert_property",
        Command::UpdateProperty { .. } => "update_property",
        Command::DeleteProperty { .. } => "delete_property",
        Command::SelectProperty { .. } => "select_property",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservation { .. } => "select_reservation",
        Command::DeleteUser { .. } => "delete_user",
    }
}
