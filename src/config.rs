use std::time::Duration;

use crate::limits::MAX_PENDING_PAYMENT_MINUTES;

const DEFAULT_PENDING_PAYMENT_MINUTES: i64 = 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a payment may stay `pending` before the sweep abandons it.
    pub pending_payment_minutes: i64,
    /// Period of the background scan for expired pending payments.
    pub sweep_interval: Duration,
    /// Prometheus listener port; `None` disables the exporter.
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_payment_minutes: DEFAULT_PENDING_PAYMENT_MINUTES,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    /// Reads `SLOTGUARD_*` variables. Missing or malformed values fall back
    /// to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pending_payment_minutes = lookup("SLOTGUARD_PENDING_PAYMENT_MINUTES")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|m| (1..=MAX_PENDING_PAYMENT_MINUTES).contains(m))
            .unwrap_or(DEFAULT_PENDING_PAYMENT_MINUTES);
        let sweep_interval_secs = lookup("SLOTGUARD_SWEEP_INTERVAL_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
        let metrics_port = lookup("SLOTGUARD_METRICS_PORT").and_then(|s| s.trim().parse().ok());

        Self {
            pending_payment_minutes,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            metrics_port,
        }
    }
}
