use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::TieredLocation;
use crate::limits::{DEFAULT_OFFER_TIMEOUT_MS, DEFAULT_RETENTION_MS};
use crate::model::Ms;

/// Engine tuning. Every field has a default, so a partial JSON document or
/// an empty environment both yield a working configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// How long a waitlist offer stays open.
    pub offer_timeout_ms: Ms,
    /// Period of the background expiry sweep.
    pub sweep_interval_ms: u64,
    /// Occurrences committed concurrently when a series is not all-or-none.
    pub series_concurrency: usize,
    /// Offers made per released slot when the caller does not say.
    pub default_notify_top: usize,
    /// How long finished waitlist entries and resolved conflicts stay
    /// queryable before the sweep drops them.
    pub retention_ms: Ms,
    pub location: TieredLocation,
    pub metrics_port: Option<u16>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            offer_timeout_ms: DEFAULT_OFFER_TIMEOUT_MS,
            sweep_interval_ms: 60_000,
            series_concurrency: 4,
            default_notify_top: 1,
            retention_ms: DEFAULT_RETENTION_MS,
            location: TieredLocation::default(),
            metrics_port: None,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl SchedulerConfig {
    /// Read `SLOTKEEPER_*` variables, falling back to defaults for anything
    /// missing or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            offer_timeout_ms: env_or("SLOTKEEPER_OFFER_TIMEOUT_MS", d.offer_timeout_ms),
            sweep_interval_ms: env_or("SLOTKEEPER_SWEEP_INTERVAL_MS", d.sweep_interval_ms),
            series_concurrency: env_or("SLOTKEEPER_SERIES_CONCURRENCY", d.series_concurrency),
            default_notify_top: env_or("SLOTKEEPER_NOTIFY_TOP", d.default_notify_top),
            retention_ms: env_or("SLOTKEEPER_RETENTION_MS", d.retention_ms),
            location: TieredLocation {
                same_building: env_or("SLOTKEEPER_LOCATION_SAME_BUILDING", d.location.same_building),
                same_campus: env_or("SLOTKEEPER_LOCATION_SAME_CAMPUS", d.location.same_campus),
                elsewhere: env_or("SLOTKEEPER_LOCATION_ELSEWHERE", d.location.elsewhere),
            },
            metrics_port: std::env::var("SLOTKEEPER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
