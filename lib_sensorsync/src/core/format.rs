//! # Record Formatter
//!
//! Turns raw store rows into viewer records. All derived fields are computed
//! here and nowhere else:
//!
//! - `isAbnormal` and the fallback average come from the abnormality evaluator.
//! - Alerts get their `event` / `eventType` from the first populated column.
//! - Setting and personality rows without stored content get a synthesized
//!   summary, so `content` is never empty.
//! - `date` / `time` are rendered in the display timezone.
//!
//! Rows without a sensor id or without any timestamp are rejected with a
//! `FormatError`; the batch helpers drop them with a warning.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tracing::warn;

use crate::core::abnormality;
use crate::error::FormatError;
use crate::models::{
    Alert, AlertRow, PersonalityBias, PersonalityRow, Reading, ReadingRow, SensorBatch,
    SettingChange, SettingRow, StoreRow,
};
use crate::utils::time::display_date_time;

pub const UNKNOWN_ALERT: &str = "Unknown alert";
pub const SETTING_CHANGED: &str = "Setting changed";

#[derive(Debug, Clone, Copy)]
pub struct RecordFormatter {
    tz: Tz,
}

impl RecordFormatter {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn reading(&self, row: &ReadingRow) -> Result<Reading, FormatError> {
        let (sensor_id, timestamp) = identity(row)?;
        let (date, time) = display_date_time(timestamp, self.tz);
        Ok(Reading {
            sensor_id,
            timestamp,
            is_abnormal: abnormality::evaluate(&row.temperatures),
            average_temperature: row
                .temperature_ave
                .filter(|t| t.is_finite())
                .or_else(|| abnormality::average(&row.temperatures)),
            temperatures: row.temperatures.clone(),
            date,
            time,
        })
    }

    pub fn alert(&self, row: &AlertRow) -> Result<Alert, FormatError> {
        let (sensor_id, timestamp) = identity(row)?;
        let (date, time) = display_date_time(timestamp, self.tz);
        Ok(Alert {
            sensor_id,
            timestamp,
            event: first_filled(&[&row.alert_reason, &row.message])
                .unwrap_or(UNKNOWN_ALERT)
                .to_string(),
            event_type: first_filled(&[&row.event_type, &row.status])
                .unwrap_or_default()
                .to_string(),
            value: row.value.clone(),
            date,
            time,
        })
    }

    pub fn setting(&self, row: &SettingRow) -> Result<SettingChange, FormatError> {
        let (sensor_id, timestamp) = identity(row)?;
        let (date, time) = display_date_time(timestamp, self.tz);
        let content = match first_filled(&[&row.content]) {
            Some(stored) => stored.to_string(),
            None => setting_content(row.change_type.as_deref(), row.value.as_ref()),
        };
        Ok(SettingChange {
            sensor_id,
            timestamp,
            content,
            change_type: row.change_type.clone(),
            value: row.value.clone(),
            date,
            time,
        })
    }

    pub fn personality(&self, row: &PersonalityRow) -> Result<PersonalityBias, FormatError> {
        let (sensor_id, timestamp) = identity(row)?;
        let (date, time) = display_date_time(timestamp, self.tz);
        let content = match first_filled(&[&row.content]) {
            Some(stored) => stored.to_string(),
            None => personality_content(row.bias_type.as_deref(), row.bias_value.as_ref()),
        };
        Ok(PersonalityBias {
            sensor_id,
            timestamp,
            content,
            bias_type: row.bias_type.clone(),
            bias_value: row.bias_value.clone(),
            date,
            time,
        })
    }

    /// Formats one sensor's readings, preserving store order (newest first).
    pub fn sensor_batch(&self, sensor_id: &str, rows: &[ReadingRow]) -> SensorBatch {
        SensorBatch {
            sensor_id: sensor_id.to_string(),
            readings: self.collect(rows, Self::reading),
        }
    }

    /// Applies `format` to every row, dropping malformed ones with a warning.
    pub fn collect<R, T>(
        &self,
        rows: &[R],
        format: impl Fn(&Self, &R) -> Result<T, FormatError>,
    ) -> Vec<T>
    where
        R: StoreRow,
    {
        rows.iter()
            .filter_map(|row| match format(self, row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(kind = R::KIND, "Skipping malformed row: {}", e);
                    None
                }
            })
            .collect()
    }
}

fn identity<R: StoreRow>(row: &R) -> Result<(String, DateTime<Utc>), FormatError> {
    let sensor_id = row
        .sensor_id()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(FormatError::MissingSensorId(R::KIND))?;
    let ts = row.ordering_time().ok_or_else(|| FormatError::MissingTimestamp {
        kind: R::KIND,
        sensor_id: sensor_id.to_string(),
    })?;
    Ok((sensor_id.to_string(), ts))
}

fn first_filled<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .find(|s| !s.trim().is_empty())
}

/// Strings render bare; everything else as compact JSON.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn setting_content(change_type: Option<&str>, value: Option<&Value>) -> String {
    let change_type = change_type.filter(|s| !s.trim().is_empty());
    let value = value.filter(|v| !v.is_null());
    if change_type.is_none() && value.is_none() {
        return SETTING_CHANGED.to_string();
    }
    format!(
        "{}: {}",
        change_type.unwrap_or("Setting"),
        value.map(render_value).unwrap_or_else(|| "-".to_string())
    )
}

fn personality_content(bias_type: Option<&str>, bias_value: Option<&Value>) -> String {
    let bias_type = bias_type.filter(|s| !s.trim().is_empty());
    let bias_value = bias_value.filter(|v| !v.is_null());

    match (bias_type, bias_value) {
        (Some("temperature_offset"), Some(value)) if value.get("offset").is_some_and(Value::is_number) => {
            let offset = &value["offset"];
            let sign = if offset.as_f64().unwrap_or_default() > 0.0 { "+" } else { "" };
            format!("温度補正バイアス: {sign}{offset}°C")
        }
        (Some("sensitivity"), Some(value)) if value.get("level").is_some() => {
            format!("感度設定: {}", render_value(&value["level"]))
        }
        (Some(kind), Some(value)) => format!("{kind}: {value}"),
        (kind, _) => format!("{}の設定", kind.unwrap_or("バイアス")),
    }
}
