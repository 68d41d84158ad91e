use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Common accessors shared by all raw rows.
pub trait StoreRow {
    /// Collection name used in log messages.
    const KIND: &'static str;

    fn sensor_id(&self) -> Option<&str>;

    /// `created_at` wins over `timestamp`; ingestion sets one or the other.
    fn ordering_time(&self) -> Option<DateTime<Utc>>;
}

/// A row of `temperature_readings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingRow {
    pub sensor_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub temperatures: Vec<Option<f64>>,
    pub temperature_ave: Option<f64>,
}

impl ReadingRow {
    pub fn new(sensor_id: &str, timestamp: DateTime<Utc>, temperatures: Vec<Option<f64>>) -> Self {
        Self {
            sensor_id: Some(sensor_id.to_string()),
            timestamp: Some(timestamp),
            temperatures,
            ..Default::default()
        }
    }
}

impl StoreRow for ReadingRow {
    const KIND: &'static str = "reading";

    fn sensor_id(&self) -> Option<&str> {
        self.sensor_id.as_deref()
    }

    fn ordering_time(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.timestamp)
    }
}

/// A row of `alerts_log`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRow {
    pub sensor_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub alert_reason: Option<String>,
    pub message: Option<String>,
    pub status: Option<String>,
    pub event_type: Option<String>,
    pub value: Option<Value>,
}

impl AlertRow {
    pub fn new(sensor_id: &str, timestamp: DateTime<Utc>, reason: &str, status: &str) -> Self {
        Self {
            sensor_id: Some(sensor_id.to_string()),
            timestamp: Some(timestamp),
            alert_reason: Some(reason.to_string()),
            status: Some(status.to_string()),
            ..Default::default()
        }
    }
}

impl StoreRow for AlertRow {
    const KIND: &'static str = "alert";

    fn sensor_id(&self) -> Option<&str> {
        self.sensor_id.as_deref()
    }

    fn ordering_time(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.timestamp)
    }
}

/// A row of `settings_history`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingRow {
    pub sensor_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub change_type: Option<String>,
    pub value: Option<Value>,
}

impl SettingRow {
    pub fn new(sensor_id: &str, timestamp: DateTime<Utc>, change_type: &str, value: Value) -> Self {
        Self {
            sensor_id: Some(sensor_id.to_string()),
            timestamp: Some(timestamp),
            change_type: Some(change_type.to_string()),
            value: Some(value),
            ..Default::default()
        }
    }
}

impl StoreRow for SettingRow {
    const KIND: &'static str = "setting";

    fn sensor_id(&self) -> Option<&str> {
        self.sensor_id.as_deref()
    }

    fn ordering_time(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.timestamp)
    }
}

/// A row of `personality_history`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalityRow {
    pub sensor_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub bias_type: Option<String>,
    pub bias_value: Option<Value>,
}

impl PersonalityRow {
    pub fn new(sensor_id: &str, timestamp: DateTime<Utc>, bias_type: &str, bias_value: Value) -> Self {
        Self {
            sensor_id: Some(sensor_id.to_string()),
            timestamp: Some(timestamp),
            bias_type: Some(bias_type.to_string()),
            bias_value: Some(bias_value),
            ..Default::default()
        }
    }
}

impl StoreRow for PersonalityRow {
    const KIND: &'static str = "personality";

    fn sensor_id(&self) -> Option<&str> {
        self.sensor_id.as_deref()
    }

    fn ordering_time(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.timestamp)
    }
}
