//! # Poll Cycle Scheduler
//!
//! Fixed-interval change detection against the store.
//!
//! ## Tick Workflow:
//! 1.  **Sensors**: list sensor ids, fetch each sensor's latest batch and
//!     broadcast it as one `sensor-delta` when its newest reading moves the
//!     watermark.
//! 2.  **Streams**: fetch the most recent alerts, setting changes and
//!     personality changes and broadcast each batch unconditionally.
//! 3.  **Heartbeat**: always emitted, even when every query failed.
//!
//! ## Serialization:
//! Ticks and snapshot builds share one cycle gate. A timer firing that finds
//! the gate taken is skipped and counted; the interval itself uses
//! `MissedTickBehavior::Skip` so a slow tick never causes a burst.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::dispatcher::{Dispatcher, Envelope, StreamKind};
use crate::core::format::RecordFormatter;
use crate::core::watermark::WatermarkTracker;
use crate::error::StoreError;
use crate::models::Heartbeat;
use crate::store::SensorStore;

/// Serializes poll ticks against snapshot builds.
pub type CycleGate = Arc<Mutex<()>>;

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sensors_polled: usize,
    pub deltas_emitted: usize,
    pub streams_emitted: usize,
    pub failures: usize,
    pub duration: Duration,
}

pub struct PollScheduler {
    store: Arc<dyn SensorStore>,
    formatter: RecordFormatter,
    dispatcher: Arc<Dispatcher>,
    watermarks: Arc<WatermarkTracker>,
    gate: CycleGate,
    interval: Duration,
    reading_limit: usize,
    stream_limit: usize,
    slow_tick: Duration,
    skipped: AtomicU64,
}

impl PollScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SensorStore>,
        formatter: RecordFormatter,
        dispatcher: Arc<Dispatcher>,
        watermarks: Arc<WatermarkTracker>,
        gate: CycleGate,
        interval: Duration,
        reading_limit: usize,
        stream_limit: usize,
        slow_tick: Duration,
    ) -> Self {
        Self {
            store,
            formatter,
            dispatcher,
            watermarks,
            gate,
            interval,
            reading_limit,
            stream_limit,
            slow_tick,
            skipped: AtomicU64::new(0),
        }
    }

    /// Timer firings dropped because the gate was busy.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// # Main Execution Loop
    ///
    /// Runs until `token` is cancelled. Cancellation also drops a tick that is
    /// still waiting on the store; nothing it produced is sent.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Data polling started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                report = self.try_tick() => {
                    if let Some(report) = report {
                        debug!(
                            sensors = report.sensors_polled,
                            deltas = report.deltas_emitted,
                            failures = report.failures,
                            elapsed_ms = report.duration.as_millis() as u64,
                            "Poll tick complete"
                        );
                    }
                }
            }
        }
        info!("Data polling stopped");
    }

    /// Runs a tick unless another tick or a snapshot holds the gate.
    pub async fn try_tick(&self) -> Option<TickReport> {
        let Ok(_guard) = self.gate.try_lock() else {
            let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(skipped, "Previous cycle still in flight, skipping tick");
            return None;
        };
        Some(self.tick().await)
    }

    /// One full cycle. Callers are responsible for holding the gate.
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        self.poll_sensors(&mut report).await;
        self.poll_streams(&mut report).await;
        self.emit(Envelope::new(StreamKind::Heartbeat, &Heartbeat { timestamp: Utc::now() }));

        report.duration = started.elapsed();
        if report.duration > self.slow_tick {
            warn!(
                elapsed_ms = report.duration.as_millis() as u64,
                "Data polling took longer than {}ms",
                self.slow_tick.as_millis()
            );
        }
        report
    }

    async fn poll_sensors(&self, report: &mut TickReport) {
        let ids = match self.store.list_sensor_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to list sensors: {}", e);
                report.failures += 1;
                return;
            }
        };

        for sensor_id in ids {
            report.sensors_polled += 1;
            let rows = match self.store.latest_readings(&sensor_id, self.reading_limit).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(sensor_id = %sensor_id, "Failed to poll sensor: {}", e);
                    report.failures += 1;
                    continue;
                }
            };

            let batch = self.formatter.sensor_batch(&sensor_id, &rows);
            let Some(newest) = batch.newest() else {
                continue;
            };
            if !self.watermarks.advance(&sensor_id, newest) {
                continue;
            }

            let envelope = Envelope::new(StreamKind::SensorDelta, &batch)
                .map(|e| e.with_mark(&sensor_id, newest));
            if self.emit(envelope) {
                report.deltas_emitted += 1;
            }
        }
    }

    async fn poll_streams(&self, report: &mut TickReport) {
        let fmt = &self.formatter;
        let limit = self.stream_limit;

        let alerts = self.store.recent_alerts(limit).await;
        self.emit_stream(report, StreamKind::AlertsDelta, alerts.map(|rows| fmt.collect(&rows, RecordFormatter::alert)));

        let settings = self.store.recent_setting_changes(limit).await;
        self.emit_stream(report, StreamKind::SettingsDelta, settings.map(|rows| fmt.collect(&rows, RecordFormatter::setting)));

        let personality = self.store.recent_personality_changes(limit).await;
        self.emit_stream(
            report,
            StreamKind::PersonalityDelta,
            personality.map(|rows| fmt.collect(&rows, RecordFormatter::personality)),
        );
    }

    fn emit_stream<T: Serialize>(&self, report: &mut TickReport, kind: StreamKind, records: Result<Vec<T>, StoreError>) {
        match records {
            Ok(records) => {
                if self.emit(Envelope::new(kind, &records)) {
                    report.streams_emitted += 1;
                }
            }
            Err(e) => {
                warn!(?kind, "Failed to poll stream: {}", e);
                report.failures += 1;
            }
        }
    }

    fn emit(&self, envelope: Result<Envelope, crate::error::EngineError>) -> bool {
        match envelope {
            Ok(envelope) => {
                self.dispatcher.broadcast(envelope);
                true
            }
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::SnapshotFloors;
    use crate::models::{AlertRow, ReadingRow};
    use crate::store::{Collection, MemoryStore};
    use chrono::{DateTime, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        dispatcher: Arc<Dispatcher>,
        watermarks: Arc<WatermarkTracker>,
        gate: CycleGate,
        scheduler: Arc<PollScheduler>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(Dispatcher::new());
        let watermarks = Arc::new(WatermarkTracker::new());
        let gate = CycleGate::default();
        let scheduler = Arc::new(PollScheduler::new(
            store.clone(),
            RecordFormatter::new(chrono_tz::UTC),
            dispatcher.clone(),
            watermarks.clone(),
            gate.clone(),
            Duration::from_millis(1000),
            100,
            10,
            Duration::from_millis(500),
        ));
        Fixture { store, dispatcher, watermarks, gate, scheduler }
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Arc<Envelope>>) -> Vec<Arc<Envelope>> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn count(envelopes: &[Arc<Envelope>], kind: StreamKind) -> usize {
        envelopes.iter().filter(|e| e.kind == kind).count()
    }

    #[tokio::test]
    async fn test_delta_only_when_watermark_advances() {
        let f = fixture();
        let mut sub = f.dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        f.store.insert_reading(ReadingRow::new("S1", at(0), vec![Some(22.0)]));
        f.watermarks.advance("S1", at(0));

        let report = f.scheduler.tick().await;
        assert_eq!(report.deltas_emitted, 0);
        let got = drain(&mut sub.receiver);
        assert_eq!(count(&got, StreamKind::SensorDelta), 0);
        assert_eq!(count(&got, StreamKind::Heartbeat), 1);

        f.store.insert_reading(ReadingRow::new("S1", at(1), vec![Some(22.0)]));
        let report = f.scheduler.tick().await;
        assert_eq!(report.deltas_emitted, 1);
        assert_eq!(f.watermarks.get("S1"), Some(at(1)));

        let got = drain(&mut sub.receiver);
        let delta = got.iter().find(|e| e.kind == StreamKind::SensorDelta).unwrap();
        assert_eq!(delta.payload["sensorId"], "S1");
        assert_eq!(delta.payload["readings"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_streams_and_heartbeat_every_tick() {
        let f = fixture();
        let mut sub = f.dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        f.store.insert_alert(AlertRow::new("S1", at(0), "hot", "HIGH"));

        for _ in 0..2 {
            let report = f.scheduler.tick().await;
            assert_eq!(report.streams_emitted, 3);
        }
        let got = drain(&mut sub.receiver);
        assert_eq!(count(&got, StreamKind::AlertsDelta), 2);
        assert_eq!(count(&got, StreamKind::SettingsDelta), 2);
        assert_eq!(count(&got, StreamKind::PersonalityDelta), 2);
        assert_eq!(count(&got, StreamKind::Heartbeat), 2);
        assert_eq!(got.last().unwrap().kind, StreamKind::Heartbeat);
    }

    #[tokio::test]
    async fn test_failing_sensor_does_not_block_others() {
        let f = fixture();
        let mut sub = f.dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        f.store.insert_reading(ReadingRow::new("S1", at(1), vec![]));
        f.store.insert_reading(ReadingRow::new("S2", at(1), vec![]));
        f.store.fail_sensor("S1", true);

        let report = f.scheduler.tick().await;
        assert_eq!(report.sensors_polled, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.deltas_emitted, 1);
        assert_eq!(f.watermarks.get("S1"), None);

        let got = drain(&mut sub.receiver);
        let delta = got.iter().find(|e| e.kind == StreamKind::SensorDelta).unwrap();
        assert_eq!(delta.payload["sensorId"], "S2");
    }

    #[tokio::test]
    async fn test_store_down_still_heartbeats() {
        let f = fixture();
        let mut sub = f.dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        f.store.fail_all(true);

        let report = f.scheduler.tick().await;
        assert_eq!(report.failures, 4);
        let got = drain(&mut sub.receiver);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, StreamKind::Heartbeat);
    }

    #[tokio::test]
    async fn test_list_failure_skips_sensor_phase_only() {
        let f = fixture();
        f.store.insert_reading(ReadingRow::new("S1", at(1), vec![]));
        f.store.fail_collection(Collection::Readings, true);

        let report = f.scheduler.tick().await;
        assert_eq!(report.sensors_polled, 0);
        assert_eq!(report.failures, 1);
        assert_eq!(report.streams_emitted, 3);
    }

    #[tokio::test]
    async fn test_busy_gate_skips_tick() {
        let f = fixture();
        let held = f.gate.lock().await;
        assert!(f.scheduler.try_tick().await.is_none());
        assert_eq!(f.scheduler.skipped_ticks(), 1);
        drop(held);
        assert!(f.scheduler.try_tick().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_duration_reported() {
        let f = fixture();
        f.store.insert_reading(ReadingRow::new("S1", at(0), vec![Some(22.0)]));
        // list + one sensor + three streams
        f.store.set_latency(Some(Duration::from_millis(200)));

        let report = f.scheduler.tick().await;
        assert!(report.duration >= Duration::from_millis(1000));
        assert!(report.duration > f.scheduler.slow_tick);
        assert_eq!(report.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_do_not_overlap() {
        let f = fixture();
        let mut sub = f.dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        f.store.insert_reading(ReadingRow::new("S1", at(0), vec![Some(22.0)]));
        // 5 calls x 500ms: each cycle takes 2.5 intervals
        f.store.set_latency(Some(Duration::from_millis(500)));

        let token = CancellationToken::new();
        let handle = tokio::spawn(f.scheduler.clone().run(token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.scheduler.try_tick().await.is_none());
        assert_eq!(f.scheduler.skipped_ticks(), 1);

        // cycles finish at 2.5s, 5.5s and 8.5s
        tokio::time::sleep(Duration::from_millis(8700)).await;
        token.cancel();
        handle.await.unwrap();

        let kinds: Vec<StreamKind> = drain(&mut sub.receiver).iter().map(|e| e.kind).collect();
        let cycle = [StreamKind::AlertsDelta, StreamKind::SettingsDelta, StreamKind::PersonalityDelta, StreamKind::Heartbeat];
        let mut expected = vec![StreamKind::SensorDelta];
        for _ in 0..3 {
            expected.extend(cycle);
        }
        assert_eq!(kinds, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let f = fixture();
        let mut sub = f.dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(f.scheduler.clone().run(token.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        token.cancel();
        handle.await.unwrap();

        let beats = count(&drain(&mut sub.receiver), StreamKind::Heartbeat);
        assert_eq!(beats, 3);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert!(drain(&mut sub.receiver).is_empty());
    }
}
