use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── Engine metrics ──────────────────────────────────────────────

/// Counter: committed status transitions. Labels: entity, to.
pub const TRANSITIONS_TOTAL: &str = "slotguard_transitions_total";

/// Counter: booking transitions rejected by the conflict guard.
pub const CONFLICTS_TOTAL: &str = "slotguard_conflicts_total";

/// Counter: `is_slot_available` calls. Labels: result.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "slotguard_availability_checks_total";

/// Histogram: `is_slot_available` latency in seconds.
pub const AVAILABILITY_CHECK_DURATION_SECONDS: &str = "slotguard_availability_check_duration_seconds";

/// Counter: pending-payment sweeps. Labels: outcome.
pub const SWEEPS_TOTAL: &str = "slotguard_sweeps_total";

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

/// Formatted tracing output filtered by `RUST_LOG` (default `info`).
/// Does nothing if the host already installed a subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
