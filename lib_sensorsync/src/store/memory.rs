use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Collection, SensorStore};
use crate::error::StoreError;
use crate::models::{AlertRow, PersonalityRow, ReadingRow, SettingRow, StoreRow};

#[derive(Default)]
struct Tables {
    readings: Vec<ReadingRow>,
    alerts: Vec<AlertRow>,
    settings: Vec<SettingRow>,
    personality: Vec<PersonalityRow>,
}

#[derive(Default)]
struct Faults {
    all: bool,
    sensors: HashSet<String>,
    collections: HashSet<Collection>,
    latency: Option<Duration>,
}

/// # Memory Store
///
/// `SensorStore` kept in process memory. Rows are appended with the
/// `insert_*` helpers; faults can be switched on per sensor, per collection or
/// globally to exercise the engine's failure paths.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_reading(&self, row: ReadingRow) {
        self.tables().readings.push(row);
    }

    pub fn insert_alert(&self, row: AlertRow) {
        self.tables().alerts.push(row);
    }

    pub fn insert_setting(&self, row: SettingRow) {
        self.tables().settings.push(row);
    }

    pub fn insert_personality(&self, row: PersonalityRow) {
        self.tables().personality.push(row);
    }

    /// Every query fails while set.
    pub fn fail_all(&self, on: bool) {
        self.faults().all = on;
    }

    /// `latest_readings` fails for this sensor while set.
    pub fn fail_sensor(&self, sensor_id: &str, on: bool) {
        let mut faults = self.faults();
        if on {
            faults.sensors.insert(sensor_id.to_string());
        } else {
            faults.sensors.remove(sensor_id);
        }
    }

    /// Queries against `collection` fail while set. Failing `Readings` also
    /// fails `list_sensor_ids`.
    pub fn fail_collection(&self, collection: Collection, on: bool) {
        let mut faults = self.faults();
        if on {
            faults.collections.insert(collection);
        } else {
            faults.collections.remove(&collection);
        }
    }

    /// Delay applied to every query.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults().latency = latency;
    }

    async fn enter(&self, collection: Option<Collection>, sensor_id: Option<&str>) -> Result<(), StoreError> {
        let (latency, failure) = {
            let faults = self.faults();
            let failure = if faults.all {
                Some("store offline".to_string())
            } else if let Some(c) = collection.filter(|c| faults.collections.contains(c)) {
                Some(format!("{c} unavailable"))
            } else {
                sensor_id
                    .filter(|s| faults.sensors.contains(*s))
                    .map(|s| format!("readings for {s} unavailable"))
            };
            (faults.latency, failure)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(reason) => Err(StoreError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn newest_first<R: StoreRow + Clone>(rows: impl Iterator<Item = R>, limit: usize) -> Vec<R> {
    let mut rows: Vec<R> = rows.collect();
    rows.sort_by_key(|r| Reverse(r.ordering_time()));
    rows.truncate(limit);
    rows
}

fn count_since<R: StoreRow>(rows: &[R], since: DateTime<Utc>) -> u64 {
    rows.iter()
        .filter(|r| r.ordering_time().is_some_and(|t| t >= since))
        .count() as u64
}

fn footprint<R: Serialize>(rows: &[R]) -> u64 {
    rows.iter()
        .map(|r| serde_json::to_vec(r).map(|v| v.len() as u64).unwrap_or_default())
        .sum()
}

#[async_trait]
impl SensorStore for MemoryStore {
    async fn list_sensor_ids(&self) -> Result<Vec<String>, StoreError> {
        self.enter(Some(Collection::Readings), None).await?;
        let ids: BTreeSet<String> = self
            .tables()
            .readings
            .iter()
            .filter_map(|r| r.sensor_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn latest_readings(&self, sensor_id: &str, limit: usize) -> Result<Vec<ReadingRow>, StoreError> {
        self.enter(Some(Collection::Readings), Some(sensor_id)).await?;
        let tables = self.tables();
        let rows = tables
            .readings
            .iter()
            .filter(|r| r.sensor_id.as_deref() == Some(sensor_id))
            .cloned();
        Ok(newest_first(rows, limit))
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRow>, StoreError> {
        self.enter(Some(Collection::Alerts), None).await?;
        Ok(newest_first(self.tables().alerts.iter().cloned(), limit))
    }

    async fn recent_setting_changes(&self, limit: usize) -> Result<Vec<SettingRow>, StoreError> {
        self.enter(Some(Collection::SettingChanges), None).await?;
        Ok(newest_first(self.tables().settings.iter().cloned(), limit))
    }

    async fn recent_personality_changes(&self, limit: usize) -> Result<Vec<PersonalityRow>, StoreError> {
        self.enter(Some(Collection::PersonalityChanges), None).await?;
        Ok(newest_first(self.tables().personality.iter().cloned(), limit))
    }

    async fn count_all(&self, collection: Collection) -> Result<u64, StoreError> {
        self.enter(Some(collection), None).await?;
        let tables = self.tables();
        let n = match collection {
            Collection::Readings => tables.readings.len(),
            Collection::Alerts => tables.alerts.len(),
            Collection::SettingChanges => tables.settings.len(),
            Collection::PersonalityChanges => tables.personality.len(),
        };
        Ok(n as u64)
    }

    async fn count_since(&self, collection: Collection, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.enter(Some(collection), None).await?;
        let tables = self.tables();
        Ok(match collection {
            Collection::Readings => count_since(&tables.readings, since),
            Collection::Alerts => count_since(&tables.alerts, since),
            Collection::SettingChanges => count_since(&tables.settings, since),
            Collection::PersonalityChanges => count_since(&tables.personality, since),
        })
    }

    async fn count_active_sensors(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.enter(Some(Collection::Readings), None).await?;
        let active: HashSet<String> = self
            .tables()
            .readings
            .iter()
            .filter(|r| r.ordering_time().is_some_and(|t| t >= since))
            .filter_map(|r| r.sensor_id.clone())
            .collect();
        Ok(active.len() as u64)
    }

    async fn last_update(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.enter(Some(Collection::Readings), None).await?;
        Ok(self.tables().readings.iter().filter_map(StoreRow::ordering_time).max())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter(None, None).await
    }

    async fn size_estimate(&self) -> Result<u64, StoreError> {
        self.enter(None, None).await?;
        let tables = self.tables();
        Ok(footprint(&tables.readings)
            + footprint(&tables.alerts)
            + footprint(&tables.settings)
            + footprint(&tables.personality))
    }
}
