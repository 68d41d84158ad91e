use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SensorId;

/// # Reading
///
/// One temperature acquisition as shown to viewers. `is_abnormal` is always the
/// evaluator's verdict on `temperatures`; a flag stored alongside the row is
/// never forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    pub temperatures: Vec<Option<f64>>,
    pub average_temperature: Option<f64>,
    pub is_abnormal: bool,
    /// Display date in the configured timezone (`YYYY/MM/DD`).
    pub date: String,
    /// Display time in the configured timezone (`HH:MM:SS`).
    pub time: String,
}

/// # Alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    /// Free-text reason.
    pub event: String,
    /// HIGH, LOW, RECOVERY, TEMPERATURE_ABNORMAL, ... (may be empty).
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub date: String,
    pub time: String,
}

/// # Setting Change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingChange {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary; never empty.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub date: String,
    pub time: String,
}

/// # Personality Bias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityBias {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary; never empty.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias_value: Option<Value>,
    pub date: String,
    pub time: String,
}

/// Payload of `sensor-full` and `sensor-delta`: one sensor's batch, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorBatch {
    pub sensor_id: SensorId,
    pub readings: Vec<Reading>,
}

impl SensorBatch {
    /// Timestamp of the newest reading in the batch.
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.readings.first().map(|r| r.timestamp)
    }
}

/// Payload of `heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
}
