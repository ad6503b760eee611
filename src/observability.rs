use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── Booking throughput ──────────────────────────────────────────

/// Counter: reservation instances written. Labels: status.
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "slotkeeper_reservations_committed_total";

/// Counter: reservation instances cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "slotkeeper_reservations_cancelled_total";

/// Counter: storage writes retried after a transient failure.
pub const COMMIT_RETRIES_TOTAL: &str = "slotkeeper_commit_retries_total";

/// Histogram: wall time of a series creation in seconds. Labels: mode.
pub const SERIES_DURATION_SECONDS: &str = "slotkeeper_series_duration_seconds";

// ── Conflicts ───────────────────────────────────────────────────

/// Counter: conflicts registered. Labels: type.
pub const CONFLICTS_DETECTED_TOTAL: &str = "slotkeeper_conflicts_detected_total";

/// Counter: conflicts moved to a terminal state. Labels: resolution.
pub const CONFLICTS_RESOLVED_TOTAL: &str = "slotkeeper_conflicts_resolved_total";

// ── Waitlist ────────────────────────────────────────────────────

/// Counter: offers sent to waiting entries.
pub const WAITLIST_NOTIFICATIONS_TOTAL: &str = "slotkeeper_waitlist_notifications_total";

/// Counter: offers that lapsed or were declined.
pub const WAITLIST_EXPIRED_TOTAL: &str = "slotkeeper_waitlist_expired_total";

/// Gauge: entries currently waiting or holding an offer.
pub const WAITLIST_ACTIVE: &str = "slotkeeper_waitlist_active";

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
