//! # Engine Configuration
//!
//! Tunables of the synchronization engine. Deserializable so binaries can embed
//! it in their own JSON config; every field has a default and may be omitted.

use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Longest accepted poll / stats period (one day).
pub const MAX_INTERVAL_MS: u64 = 86_400_000;
/// Longest accepted active-sensor window (one year).
pub const MAX_ACTIVE_WINDOW_SECS: u64 = 31_536_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Poll tick period.
    pub poll_interval_ms: u64,
    /// Stats tick period.
    pub stats_interval_ms: u64,
    /// Readings fetched per sensor for deltas and snapshots.
    pub reading_limit: usize,
    /// Alerts / settings / personality rows fetched per tick.
    pub stream_limit: usize,
    /// Alerts / settings / personality rows sent in a full snapshot.
    pub snapshot_stream_limit: usize,
    /// Ticks slower than this are logged at warn.
    pub slow_tick_ms: u64,
    /// A sensor is active when it reported within this window.
    pub active_window_secs: u64,
    /// IANA name used for display date/time and for "today".
    pub display_timezone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            stats_interval_ms: 5000,
            reading_limit: 100,
            stream_limit: 10,
            snapshot_stream_limit: 100,
            slow_tick_ms: 500,
            active_window_secs: 300,
            display_timezone: "Asia/Tokyo".to_string(),
        }
    }
}

impl EngineConfig {
    /// Rejects zero or oversized periods, zero limits and unknown timezones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value, max) in [
            ("poll_interval_ms", self.poll_interval_ms, MAX_INTERVAL_MS),
            ("stats_interval_ms", self.stats_interval_ms, MAX_INTERVAL_MS),
            ("active_window_secs", self.active_window_secs, MAX_ACTIVE_WINDOW_SECS),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidInterval { name });
            }
            if value > max {
                return Err(ConfigError::OutOfRange { name, max });
            }
        }
        if self.slow_tick_ms > MAX_INTERVAL_MS {
            return Err(ConfigError::OutOfRange {
                name: "slow_tick_ms",
                max: MAX_INTERVAL_MS,
            });
        }
        for (name, value) in [
            ("reading_limit", self.reading_limit),
            ("stream_limit", self.stream_limit),
            ("snapshot_stream_limit", self.snapshot_stream_limit),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidLimit { name });
            }
        }
        self.timezone().map(|_| ())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.display_timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.display_timezone.clone()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn slow_tick_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_tick_ms)
    }

    /// Saturates instead of overflowing for values `validate` would reject.
    pub fn active_window(&self) -> chrono::Duration {
        i64::try_from(self.active_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}
