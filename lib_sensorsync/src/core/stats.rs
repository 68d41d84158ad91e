//! # Stats Collector
//!
//! Aggregates the three display panels on its own cadence (first emission
//! immediately on start). Each figure is computed independently; a failed
//! query zeroes that one field and leaves the rest intact.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::dispatcher::{Dispatcher, Envelope, StreamKind, SubscriberId};
use crate::error::{EngineError, StoreError};
use crate::models::{DataStats, PerformanceStats, ServerStats, StatsBundle};
use crate::store::{Collection, SensorStore};
use crate::utils::sys_info::ProcessSampler;
use crate::utils::time::start_of_day;

pub struct StatsCollector {
    store: Arc<dyn SensorStore>,
    dispatcher: Arc<Dispatcher>,
    sampler: Mutex<ProcessSampler>,
    interval: Duration,
    active_window: chrono::Duration,
    tz: Tz,
}

fn or_neutral<T: Default>(field: &'static str, result: Result<T, StoreError>) -> T {
    result.unwrap_or_else(|e| {
        warn!(field, "Stats query failed: {}", e);
        T::default()
    })
}

impl StatsCollector {
    pub fn new(
        store: Arc<dyn SensorStore>,
        dispatcher: Arc<Dispatcher>,
        interval: Duration,
        active_window: chrono::Duration,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            dispatcher,
            sampler: Mutex::new(ProcessSampler::new()),
            interval,
            active_window,
            tz,
        }
    }

    pub async fn collect(&self) -> StatsBundle {
        let now = Utc::now();
        let today = start_of_day(now, self.tz);
        let active_since = now.checked_sub_signed(self.active_window);
        let store = &self.store;

        let (sensors, active, last, ping, total, today_points, total_alerts, today_alerts, size) = tokio::join!(
            store.list_sensor_ids(),
            async {
                match active_since {
                    Some(since) => store.count_active_sensors(since).await,
                    None => Err(StoreError::Query("active window reaches before the representable range".to_string())),
                }
            },
            store.last_update(),
            store.ping(),
            store.count_all(Collection::Readings),
            store.count_since(Collection::Readings, today),
            store.count_all(Collection::Alerts),
            store.count_since(Collection::Alerts, today),
            store.size_estimate(),
        );

        let sample = self
            .sampler
            .lock()
            .map(|mut s| s.sample())
            .unwrap_or_default();

        StatsBundle {
            server: ServerStats {
                total_sensors: or_neutral("totalSensors", sensors.map(|ids| ids.len() as u64)),
                active_sensors: or_neutral("activeSensors", active),
                last_update_time: or_neutral("lastUpdateTime", last),
                store_connected: ping.is_ok(),
            },
            performance: PerformanceStats {
                uptime: sample.uptime_secs as f64,
                cpu_usage: sample.cpu_usage,
                memory_usage: sample.memory_bytes,
                client_count: self.dispatcher.client_count(),
            },
            data: DataStats {
                total_data_points: or_neutral("totalDataPoints", total),
                today_data_points: or_neutral("todayDataPoints", today_points),
                total_alerts: or_neutral("totalAlerts", total_alerts),
                today_alerts: or_neutral("todayAlerts", today_alerts),
                db_size: or_neutral("dbSize", size),
            },
        }
    }

    /// The three stats messages in emission order.
    pub fn envelopes(bundle: &StatsBundle) -> Result<Vec<Envelope>, EngineError> {
        Ok(vec![
            Envelope::new(StreamKind::ServerStats, &bundle.server)?,
            Envelope::new(StreamKind::PerformanceStats, &bundle.performance)?,
            Envelope::new(StreamKind::DataStats, &bundle.data)?,
        ])
    }

    /// Collects and broadcasts to every viewer.
    pub async fn emit(&self) {
        let bundle = self.collect().await;
        match Self::envelopes(&bundle) {
            Ok(envelopes) => {
                for envelope in envelopes {
                    self.dispatcher.broadcast(envelope);
                }
            }
            Err(e) => error!("Failed to encode stats: {}", e),
        }
    }

    /// Collects and unicasts to one viewer.
    pub async fn send_to(&self, id: SubscriberId) -> Result<(), EngineError> {
        let bundle = self.collect().await;
        for envelope in Self::envelopes(&bundle)? {
            self.dispatcher.send_to(id, envelope)?;
        }
        Ok(())
    }

    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Stats collection started");
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
                _ = self.emit() => debug!("Stats emitted"),
            }
        }
        info!("Stats collection stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::SnapshotFloors;
    use crate::models::{AlertRow, ReadingRow};
    use crate::store::MemoryStore;

    fn collector(store: Arc<MemoryStore>, dispatcher: Arc<Dispatcher>) -> Arc<StatsCollector> {
        collector_with_window(store, dispatcher, chrono::Duration::seconds(300))
    }

    fn collector_with_window(
        store: Arc<MemoryStore>,
        dispatcher: Arc<Dispatcher>,
        active_window: chrono::Duration,
    ) -> Arc<StatsCollector> {
        Arc::new(StatsCollector::new(
            store,
            dispatcher,
            Duration::from_millis(5000),
            active_window,
            chrono_tz::UTC,
        ))
    }

    #[tokio::test]
    async fn test_collect_counts() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_reading(ReadingRow::new("S1", now, vec![Some(22.0)]));
        store.insert_reading(ReadingRow::new("S2", now - chrono::Duration::hours(1), vec![]));
        store.insert_reading(ReadingRow::new("S2", now - chrono::Duration::days(3), vec![]));
        store.insert_alert(AlertRow::new("S1", now, "hot", "HIGH"));

        let dispatcher = Arc::new(Dispatcher::new());
        let _sub = dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        let bundle = collector(store, dispatcher).collect().await;

        assert_eq!(bundle.server.total_sensors, 2);
        assert_eq!(bundle.server.active_sensors, 1);
        assert_eq!(bundle.server.last_update_time, Some(now));
        assert!(bundle.server.store_connected);
        assert_eq!(bundle.performance.client_count, 1);
        assert_eq!(bundle.data.total_data_points, 3);
        assert!(bundle.data.today_data_points >= 1);
        assert_eq!(bundle.data.total_alerts, 1);
        assert_eq!(bundle.data.today_alerts, 1);
        assert!(bundle.data.db_size > 0);
    }

    #[tokio::test]
    async fn test_failures_yield_neutral_values() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reading(ReadingRow::new("S1", Utc::now(), vec![]));
        store.fail_all(true);

        let bundle = collector(store, Arc::new(Dispatcher::new())).collect().await;
        assert_eq!(bundle.server, ServerStats::default());
        assert_eq!(bundle.data, DataStats::default());
        assert!(bundle.performance.memory_usage > 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_window_zeroes_active_sensors() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reading(ReadingRow::new("S1", Utc::now(), vec![Some(22.0)]));

        let stats = collector_with_window(store, Arc::new(Dispatcher::new()), chrono::Duration::MAX);
        let bundle = stats.collect().await;
        assert_eq!(bundle.server.active_sensors, 0);
        assert_eq!(bundle.server.total_sensors, 1);
        assert_eq!(bundle.data.total_data_points, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_unrepresentable_window() {
        let dispatcher = Arc::new(Dispatcher::new());
        let mut sub = dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        let stats = collector_with_window(Arc::new(MemoryStore::new()), dispatcher, chrono::Duration::MAX);
        let token = CancellationToken::new();
        let handle = tokio::spawn(stats.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(5010)).await;
        token.cancel();
        handle.await.unwrap();

        let panels = std::iter::from_fn(|| sub.receiver.try_recv().ok())
            .filter(|e| e.kind == StreamKind::ServerStats)
            .count();
        assert_eq!(panels, 2);
    }

    #[tokio::test]
    async fn test_send_to_unicasts_three_messages() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(Dispatcher::new());
        let mut a = dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        let mut b = dispatcher.attach(2, vec![], SnapshotFloors::new()).unwrap();

        collector(store, dispatcher).send_to(1).await.unwrap();
        let kinds: Vec<_> = std::iter::from_fn(|| a.receiver.try_recv().ok()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![StreamKind::ServerStats, StreamKind::PerformanceStats, StreamKind::DataStats]
        );
        assert!(b.receiver.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_emission_is_immediate() {
        let dispatcher = Arc::new(Dispatcher::new());
        let mut sub = dispatcher.attach(1, vec![], SnapshotFloors::new()).unwrap();
        let stats = collector(Arc::new(MemoryStore::new()), dispatcher);
        let token = CancellationToken::new();
        let handle = tokio::spawn(stats.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        handle.await.unwrap();

        let first = sub.receiver.try_recv().unwrap();
        assert_eq!(first.kind, StreamKind::ServerStats);
    }
}
