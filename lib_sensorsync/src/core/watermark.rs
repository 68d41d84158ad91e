//! # Watermark Tracker
//!
//! Per-sensor record of the newest reading timestamp already broadcast to
//! every connected viewer. Entries are created lazily and only ever move
//! forward.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Thread-safe map of `sensor_id -> last delivered timestamp`.
#[derive(Debug, Default)]
pub struct WatermarkTracker {
    marks: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl WatermarkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sensor_id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(sensor_id).copied()
    }

    /// Stores `ts` only when it is strictly newer than the current mark.
    ///
    /// Returns `true` when the mark moved.
    pub fn advance(&self, sensor_id: &str, ts: DateTime<Utc>) -> bool {
        let mut marks = self.lock();
        match marks.get_mut(sensor_id) {
            Some(current) if *current >= ts => false,
            Some(current) => {
                *current = ts;
                true
            }
            None => {
                marks.insert(sensor_id.to_string(), ts);
                true
            }
        }
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // A panic while holding the guard cannot leave the map half-written.
        self.marks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
