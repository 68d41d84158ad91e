use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sensor liveness and store connectivity. Payload of `server-stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub total_sensors: u64,
    /// Sensors with at least one reading inside the active window.
    pub active_sensors: u64,
    pub last_update_time: Option<DateTime<Utc>>,
    pub store_connected: bool,
}

/// Process health snapshot. Payload of `performance-stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    /// Seconds since the engine started.
    pub uptime: f64,
    /// Host CPU utilisation in percent.
    pub cpu_usage: f32,
    /// Resident set size of this process in bytes.
    pub memory_usage: u64,
    pub client_count: usize,
}

/// Record counts. Payload of `data-stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStats {
    pub total_data_points: u64,
    pub today_data_points: u64,
    pub total_alerts: u64,
    pub today_alerts: u64,
    /// Estimated store size in bytes.
    pub db_size: u64,
}

/// The three stats panels produced by one collection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsBundle {
    pub server: ServerStats,
    pub performance: PerformanceStats,
    pub data: DataStats,
}
