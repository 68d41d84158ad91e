//! # Publisher
//!
//! Direct push hooks for in-process ingestion. Each call formats a single row
//! and broadcasts it immediately as a `*-new` message. Watermarks are left
//! alone; the poll loop still decides what counts as a delta.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::core::dispatcher::{Dispatcher, Envelope, StreamKind};
use crate::core::format::RecordFormatter;
use crate::error::EngineError;
use crate::models::{Alert, AlertRow, PersonalityBias, PersonalityRow, Reading, ReadingRow, SettingChange, SettingRow};

pub const ABNORMAL_EVENT: &str = "温度異常を検出しました";
pub const ABNORMAL_EVENT_TYPE: &str = "TEMPERATURE_ABNORMAL";

pub struct Publisher {
    formatter: RecordFormatter,
    dispatcher: Arc<Dispatcher>,
}

impl Publisher {
    pub fn new(formatter: RecordFormatter, dispatcher: Arc<Dispatcher>) -> Self {
        Self { formatter, dispatcher }
    }

    /// Broadcasts `sensor-new`, followed by a derived `alert-new` when the
    /// reading is abnormal.
    pub fn publish_reading(&self, row: &ReadingRow) -> Result<Reading, EngineError> {
        let reading = self.formatter.reading(row)?;
        self.dispatcher
            .broadcast(Envelope::new(StreamKind::SensorNew, &reading)?);

        if reading.is_abnormal {
            let alert = Alert {
                sensor_id: reading.sensor_id.clone(),
                timestamp: reading.timestamp,
                event: ABNORMAL_EVENT.to_string(),
                event_type: ABNORMAL_EVENT_TYPE.to_string(),
                value: Some(json!({ "averageTemperature": reading.average_temperature })),
                date: reading.date.clone(),
                time: reading.time.clone(),
            };
            self.broadcast_alert(&alert)?;
        }
        Ok(reading)
    }

    pub fn publish_alert(&self, row: &AlertRow) -> Result<Alert, EngineError> {
        let alert = self.formatter.alert(row)?;
        self.broadcast_alert(&alert)?;
        Ok(alert)
    }

    pub fn publish_setting_change(&self, row: &SettingRow) -> Result<SettingChange, EngineError> {
        let setting = self.formatter.setting(row)?;
        self.dispatcher
            .broadcast(Envelope::new(StreamKind::SettingNew, &setting)?);
        info!(sensor_id = %setting.sensor_id, content = %setting.content, "Emitted setting change");
        Ok(setting)
    }

    pub fn publish_personality_change(&self, row: &PersonalityRow) -> Result<PersonalityBias, EngineError> {
        let bias = self.formatter.personality(row)?;
        self.dispatcher
            .broadcast(Envelope::new(StreamKind::PersonalityNew, &bias)?);
        info!(sensor_id = %bias.sensor_id, content = %bias.content, "Emitted personality update");
        Ok(bias)
    }

    fn broadcast_alert(&self, alert: &Alert) -> Result<(), EngineError> {
        self.dispatcher
            .broadcast(Envelope::new(StreamKind::AlertNew, alert)?);
        info!(sensor_id = %alert.sensor_id, event = %alert.event, "Emitted alert");
        Ok(())
    }
}
