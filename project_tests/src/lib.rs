//! Shared fixtures for the end-to-end engine scenarios.

use chrono::{DateTime, TimeZone, Utc};
use lib_sensorsync::models::ReadingRow;
use lib_sensorsync::store::MemoryStore;
use lib_sensorsync::{Envelope, EngineConfig, StreamKind, Subscription, SyncEngine};
use std::sync::Arc;

/// Fixed base instant plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn normal(sensor_id: &str, secs: i64) -> ReadingRow {
    ReadingRow::new(sensor_id, at(secs), vec![Some(22.5), Some(23.1), Some(22.8)])
}

pub fn engine_with(store: &Arc<MemoryStore>) -> SyncEngine {
    let config = EngineConfig {
        display_timezone: "UTC".to_string(),
        ..EngineConfig::default()
    };
    SyncEngine::new(store.clone(), config).unwrap()
}

/// Everything currently queued for `sub`.
pub fn drain(sub: &mut Subscription) -> Vec<Arc<Envelope>> {
    std::iter::from_fn(|| sub.receiver.try_recv().ok()).collect()
}

pub fn of_kind(envelopes: &[Arc<Envelope>], kind: StreamKind) -> Vec<Arc<Envelope>> {
    envelopes.iter().filter(|e| e.kind == kind).cloned().collect()
}

/// Newest reading timestamp carried by a `sensor-*` payload.
pub fn newest_in(envelope: &Envelope) -> Option<DateTime<Utc>> {
    let ts = envelope.payload["readings"][0]["timestamp"].clone();
    serde_json::from_value(ts).ok()
}
