//! # Snapshot Builder
//!
//! Produces the "full state" a viewer receives on join and on request: one
//! `sensor-full` per sensor followed by `alerts-full`, `settings-full` and
//! `personality-full`. Failed units are left out of the snapshot rather than
//! sent empty, so a viewer never clears data it already shows.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::core::dispatcher::{Envelope, SnapshotFloors, StreamKind};
use crate::core::format::RecordFormatter;
use crate::store::SensorStore;

/// Envelopes in delivery order plus the per-sensor floors they establish.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub envelopes: Vec<Envelope>,
    pub floors: SnapshotFloors,
    /// Units (sensors or streams) that could not be read.
    pub failures: usize,
}

pub struct SnapshotBuilder {
    store: Arc<dyn SensorStore>,
    formatter: RecordFormatter,
    reading_limit: usize,
    stream_limit: usize,
}

impl SnapshotBuilder {
    pub fn new(
        store: Arc<dyn SensorStore>,
        formatter: RecordFormatter,
        reading_limit: usize,
        stream_limit: usize,
    ) -> Self {
        Self {
            store,
            formatter,
            reading_limit,
            stream_limit,
        }
    }

    pub async fn build(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();

        match self.store.list_sensor_ids().await {
            Ok(ids) => {
                for sensor_id in ids {
                    self.add_sensor(&mut snapshot, &sensor_id).await;
                }
            }
            Err(e) => {
                warn!("Snapshot: failed to list sensors: {}", e);
                snapshot.failures += 1;
            }
        }

        let fmt = &self.formatter;
        let limit = self.stream_limit;

        match self.store.recent_alerts(limit).await {
            Ok(rows) => push(&mut snapshot, StreamKind::AlertsFull, &fmt.collect(&rows, RecordFormatter::alert)),
            Err(e) => fail(&mut snapshot, StreamKind::AlertsFull, e),
        }
        match self.store.recent_setting_changes(limit).await {
            Ok(rows) => push(&mut snapshot, StreamKind::SettingsFull, &fmt.collect(&rows, RecordFormatter::setting)),
            Err(e) => fail(&mut snapshot, StreamKind::SettingsFull, e),
        }
        match self.store.recent_personality_changes(limit).await {
            Ok(rows) => push(
                &mut snapshot,
                StreamKind::PersonalityFull,
                &fmt.collect(&rows, RecordFormatter::personality),
            ),
            Err(e) => fail(&mut snapshot, StreamKind::PersonalityFull, e),
        }

        debug!(
            envelopes = snapshot.envelopes.len(),
            sensors = snapshot.floors.len(),
            failures = snapshot.failures,
            "Snapshot built"
        );
        snapshot
    }

    async fn add_sensor(&self, snapshot: &mut Snapshot, sensor_id: &str) {
        let rows = match self.store.latest_readings(sensor_id, self.reading_limit).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(sensor_id, "Snapshot: failed to read sensor: {}", e);
                snapshot.failures += 1;
                return;
            }
        };

        let batch = self.formatter.sensor_batch(sensor_id, &rows);
        let Some(newest) = batch.newest() else {
            return;
        };
        match Envelope::new(StreamKind::SensorFull, &batch) {
            Ok(envelope) => {
                snapshot.envelopes.push(envelope.with_mark(sensor_id, newest));
                snapshot.floors.insert(sensor_id.to_string(), newest);
            }
            Err(e) => error!(sensor_id, "Snapshot: failed to encode sensor batch: {}", e),
        }
    }
}

fn push<T: Serialize>(snapshot: &mut Snapshot, kind: StreamKind, records: &[T]) {
    match Envelope::new(kind, records) {
        Ok(envelope) => snapshot.envelopes.push(envelope),
        Err(e) => error!(?kind, "Snapshot: failed to encode: {}", e),
    }
}

fn fail(snapshot: &mut Snapshot, kind: StreamKind, e: impl std::fmt::Display) {
    warn!(?kind, "Snapshot: query failed: {}", e);
    snapshot.failures += 1;
}
