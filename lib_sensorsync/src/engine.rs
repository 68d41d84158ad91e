//! # Sync Engine
//!
//! Owns and wires every component. Transports only need this type: connect a
//! viewer through `registry()`, forward its requests, and disconnect it when
//! the socket closes.

use std::sync::Arc;

use tracing::info;

use crate::configs::EngineConfig;
use crate::core::dispatcher::Dispatcher;
use crate::core::format::RecordFormatter;
use crate::core::publisher::Publisher;
use crate::core::registry::Registry;
use crate::core::scheduler::{CycleGate, PollScheduler};
use crate::core::snapshot::SnapshotBuilder;
use crate::core::stats::StatsCollector;
use crate::core::watermark::WatermarkTracker;
use crate::error::EngineError;
use crate::store::SensorStore;

pub struct SyncEngine {
    config: EngineConfig,
    dispatcher: Arc<Dispatcher>,
    watermarks: Arc<WatermarkTracker>,
    scheduler: Arc<PollScheduler>,
    registry: Registry,
    publisher: Publisher,
}

impl SyncEngine {
    /// Validates `config` and builds the component graph. Nothing runs until
    /// the first viewer connects.
    pub fn new(store: Arc<dyn SensorStore>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let formatter = RecordFormatter::new(config.timezone()?);
        let dispatcher = Arc::new(Dispatcher::new());
        let watermarks = Arc::new(WatermarkTracker::new());
        let gate = CycleGate::default();

        let scheduler = Arc::new(PollScheduler::new(
            Arc::clone(&store),
            formatter,
            Arc::clone(&dispatcher),
            Arc::clone(&watermarks),
            Arc::clone(&gate),
            config.poll_interval(),
            config.reading_limit,
            config.stream_limit,
            config.slow_tick_threshold(),
        ));
        let stats = Arc::new(StatsCollector::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            config.stats_interval(),
            config.active_window(),
            formatter.timezone(),
        ));
        let snapshots = SnapshotBuilder::new(
            Arc::clone(&store),
            formatter,
            config.reading_limit,
            config.snapshot_stream_limit,
        );
        let registry = Registry::new(
            Arc::clone(&dispatcher),
            snapshots,
            Arc::clone(&scheduler),
            stats,
            gate,
        );
        let publisher = Publisher::new(formatter, Arc::clone(&dispatcher));

        Ok(Self {
            config,
            dispatcher,
            watermarks,
            scheduler,
            registry,
            publisher,
        })
    }

    /// Like `new`, but fails fast when the store does not answer a ping.
    pub async fn connect(store: Arc<dyn SensorStore>, config: EngineConfig) -> Result<Self, EngineError> {
        let engine = Self::new(Arc::clone(&store), config)?;
        store.ping().await?;
        info!(timezone = %engine.config.display_timezone, "Sync engine ready");
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn watermarks(&self) -> &WatermarkTracker {
        &self.watermarks
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.scheduler.skipped_ticks()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count().await
    }

    pub async fn is_running(&self) -> bool {
        self.registry.is_running().await
    }

    /// Forgets every watermark; the next tick re-broadcasts each sensor.
    pub fn reset_watermarks(&self) {
        self.watermarks.reset();
        info!("Watermarks reset");
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::StreamKind;
    use crate::error::ConfigError;
    use crate::models::ReadingRow;
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig { stats_interval_ms: 0, ..Default::default() };
        let result = SyncEngine::new(Arc::new(MemoryStore::new()), config);
        assert!(matches!(result, Err(EngineError::Config(ConfigError::InvalidInterval { .. }))));
    }

    #[test]
    fn test_oversized_active_window_rejected() {
        let config = EngineConfig { active_window_secs: 1_000_000_000_000_000, ..Default::default() };
        let result = SyncEngine::new(Arc::new(MemoryStore::new()), config);
        assert!(matches!(
            result,
            Err(EngineError::Config(ConfigError::OutOfRange { name: "active_window_secs", .. }))
        ));
    }

    #[tokio::test]
    async fn test_connect_fails_when_store_down() {
        let store = Arc::new(MemoryStore::new());
        store.fail_all(true);
        let result = SyncEngine::connect(store, EngineConfig::default()).await;
        assert!(matches!(result, Err(EngineError::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refcount_starts_and_stops_loops() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reading(ReadingRow::new("S1", Utc::now(), vec![Some(22.0)]));
        let engine = SyncEngine::connect(store, EngineConfig::default()).await.unwrap();
        assert!(!engine.is_running().await);

        let mut a = engine.registry().on_connect(1).await.unwrap();
        assert!(engine.is_running().await);
        assert_eq!(a.receiver.try_recv().unwrap().kind, StreamKind::SensorFull);

        let _b = engine.registry().on_connect(2).await.unwrap();
        assert!(matches!(
            engine.registry().on_connect(2).await,
            Err(EngineError::DuplicateSubscriber(2))
        ));
        assert_eq!(engine.subscriber_count().await, 2);

        engine.registry().on_disconnect(1).await.unwrap();
        assert!(engine.is_running().await);
        engine.registry().on_disconnect(2).await.unwrap();
        assert!(!engine.is_running().await);
        assert!(matches!(
            engine.registry().on_disconnect(2).await,
            Err(EngineError::UnknownSubscriber(2))
        ));
    }

    #[tokio::test]
    async fn test_requests_for_unknown_subscriber() {
        let engine = SyncEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default()).unwrap();
        assert!(matches!(
            engine.registry().on_request_full_sync(9).await,
            Err(EngineError::UnknownSubscriber(9))
        ));
        assert!(matches!(
            engine.registry().on_request_server_stats(9).await,
            Err(EngineError::UnknownSubscriber(9))
        ));
    }

    #[test]
    fn test_reset_watermarks() {
        let engine = SyncEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default()).unwrap();
        engine.watermarks().advance("S1", Utc::now());
        engine.reset_watermarks();
        assert!(engine.watermarks().is_empty());
    }
}
