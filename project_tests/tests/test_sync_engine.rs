//! End-to-end engine scenarios over the in-memory store, on paused time.

use lib_sensorsync::core::dispatcher::SnapshotFloors;
use lib_sensorsync::models::{AlertRow, ReadingRow, SettingRow};
use lib_sensorsync::store::MemoryStore;
use lib_sensorsync::{Collection, StreamKind};
use project_tests::{at, drain, engine_with, newest_in, normal, of_kind};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Lets the spawned loops run whatever is due now.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn next_tick() {
    tokio::time::sleep(Duration::from_millis(1000)).await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_precedes_live_traffic() {
    let store = Arc::new(MemoryStore::new());
    store.insert_reading(normal("S1", 0));
    store.insert_reading(normal("S2", 0));
    let engine = engine_with(&store);

    let mut a = engine.registry().on_connect(1).await.unwrap();
    settle().await;
    let got = drain(&mut a);

    let kinds: Vec<StreamKind> = got.iter().map(|e| e.kind).collect();
    assert_eq!(
        &kinds[..5],
        &[
            StreamKind::SensorFull,
            StreamKind::SensorFull,
            StreamKind::AlertsFull,
            StreamKind::SettingsFull,
            StreamKind::PersonalityFull,
        ]
    );
    assert_eq!(of_kind(&got, StreamKind::Heartbeat).len(), 1);
    assert_eq!(of_kind(&got, StreamKind::ServerStats).len(), 1);
    assert!(of_kind(&got, StreamKind::SensorDelta).is_empty());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mid_stream_join_gets_no_duplicate_delta() {
    let store = Arc::new(MemoryStore::new());
    store.insert_reading(normal("S1", 0));
    let engine = engine_with(&store);

    let mut a = engine.registry().on_connect(1).await.unwrap();
    settle().await;
    drain(&mut a);

    store.insert_reading(normal("S1", 10));
    let mut b = engine.registry().on_connect(2).await.unwrap();
    let first = b.receiver.try_recv().unwrap();
    assert_eq!(first.kind, StreamKind::SensorFull);
    assert_eq!(newest_in(&first), Some(at(10)));

    next_tick().await;

    let deltas_a = of_kind(&drain(&mut a), StreamKind::SensorDelta);
    assert_eq!(deltas_a.len(), 1);
    assert_eq!(newest_in(&deltas_a[0]), Some(at(10)));

    let rest_b = drain(&mut b);
    assert!(of_kind(&rest_b, StreamKind::SensorDelta).is_empty());
    assert_eq!(of_kind(&rest_b, StreamKind::Heartbeat).len(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_watermark_only_moves_forward() {
    let store = Arc::new(MemoryStore::new());
    store.insert_reading(normal("S1", 0));
    let engine = engine_with(&store);
    let mut observer = engine.dispatcher().attach(99, vec![], SnapshotFloors::new()).unwrap();

    let _a = engine.registry().on_connect(1).await.unwrap();
    settle().await;
    assert_eq!(of_kind(&drain(&mut observer), StreamKind::SensorDelta).len(), 1);
    assert_eq!(engine.watermarks().get("S1"), Some(at(0)));

    next_tick().await;
    assert!(of_kind(&drain(&mut observer), StreamKind::SensorDelta).is_empty());

    store.insert_reading(normal("S1", 5));
    next_tick().await;
    let deltas = of_kind(&drain(&mut observer), StreamKind::SensorDelta);
    assert_eq!(deltas.len(), 1);
    assert_eq!(newest_in(&deltas[0]), Some(at(5)));
    assert_eq!(engine.watermarks().get("S1"), Some(at(5)));

    // A late row older than the watermark changes nothing.
    store.insert_reading(normal("S1", 2));
    next_tick().await;
    assert!(of_kind(&drain(&mut observer), StreamKind::SensorDelta).is_empty());
    assert_eq!(engine.watermarks().get("S1"), Some(at(5)));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_loops_follow_viewer_count() {
    let store = Arc::new(MemoryStore::new());
    store.insert_reading(normal("S1", 0));
    let engine = engine_with(&store);
    let mut observer = engine.dispatcher().attach(99, vec![], SnapshotFloors::new()).unwrap();

    let _a = engine.registry().on_connect(1).await.unwrap();
    settle().await;
    assert_eq!(of_kind(&drain(&mut observer), StreamKind::Heartbeat).len(), 1);

    engine.registry().on_disconnect(1).await.unwrap();
    assert!(!engine.is_running().await);
    settle().await;
    drain(&mut observer);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(drain(&mut observer).is_empty());

    let mut b = engine.registry().on_connect(2).await.unwrap();
    assert_eq!(b.receiver.try_recv().unwrap().kind, StreamKind::SensorFull);
    assert!(engine.is_running().await);
    settle().await;
    assert_eq!(of_kind(&drain(&mut observer), StreamKind::Heartbeat).len(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_isolated() {
    let store = Arc::new(MemoryStore::new());
    store.insert_reading(normal("S1", 0));
    store.insert_reading(normal("S2", 0));
    store.fail_sensor("S2", true);
    store.fail_collection(Collection::Alerts, true);
    let engine = engine_with(&store);
    let mut observer = engine.dispatcher().attach(99, vec![], SnapshotFloors::new()).unwrap();

    let mut a = engine.registry().on_connect(1).await.unwrap();
    let snapshot = drain(&mut a);
    let kinds: Vec<StreamKind> = snapshot.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![StreamKind::SensorFull, StreamKind::SettingsFull, StreamKind::PersonalityFull]
    );

    settle().await;
    let got = drain(&mut observer);
    assert_eq!(of_kind(&got, StreamKind::SensorDelta).len(), 1);
    assert!(of_kind(&got, StreamKind::AlertsDelta).is_empty());
    assert_eq!(of_kind(&got, StreamKind::SettingsDelta).len(), 1);
    assert_eq!(of_kind(&got, StreamKind::Heartbeat).len(), 1);

    store.fail_all(true);
    next_tick().await;
    let got = drain(&mut observer);
    let kinds: Vec<StreamKind> = got.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![StreamKind::Heartbeat]);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_full_sync_request_refreshes_floor() {
    let store = Arc::new(MemoryStore::new());
    store.insert_reading(normal("S1", 0));
    let engine = engine_with(&store);
    let mut observer = engine.dispatcher().attach(99, vec![], SnapshotFloors::new()).unwrap();

    let mut a = engine.registry().on_connect(1).await.unwrap();
    settle().await;
    drain(&mut a);
    drain(&mut observer);

    store.insert_reading(normal("S1", 10));
    engine.registry().on_request_full_sync(1).await.unwrap();
    let resync = drain(&mut a);
    assert_eq!(resync[0].kind, StreamKind::SensorFull);
    assert_eq!(newest_in(&resync[0]), Some(at(10)));

    next_tick().await;
    assert!(of_kind(&drain(&mut a), StreamKind::SensorDelta).is_empty());
    assert_eq!(of_kind(&drain(&mut observer), StreamKind::SensorDelta).len(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_stats_request_is_unicast() {
    let store = Arc::new(MemoryStore::new());
    store.insert_reading(normal("S1", 0));
    store.insert_alert(AlertRow::new("S1", at(0), "温度異常", "active"));
    let engine = engine_with(&store);

    let mut a = engine.registry().on_connect(1).await.unwrap();
    let mut b = engine.registry().on_connect(2).await.unwrap();
    settle().await;
    drain(&mut a);
    drain(&mut b);

    engine.registry().on_request_server_stats(1).await.unwrap();
    let got = drain(&mut a);
    let kinds: Vec<StreamKind> = got.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![StreamKind::ServerStats, StreamKind::PerformanceStats, StreamKind::DataStats]
    );
    assert_eq!(got[0].payload["totalSensors"], json!(1));
    assert_eq!(got[1].payload["clientCount"], json!(2));
    assert_eq!(got[2].payload["totalAlerts"], json!(1));
    assert!(drain(&mut b).is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_published_records_reach_every_viewer() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(&store);
    let mut a = engine.dispatcher().attach(1, vec![], SnapshotFloors::new()).unwrap();
    let mut b = engine.dispatcher().attach(2, vec![], SnapshotFloors::new()).unwrap();

    let hot = ReadingRow::new("S1", at(0), vec![Some(30.0), Some(31.0)]);
    let reading = engine.publisher().publish_reading(&hot).unwrap();
    assert!(reading.is_abnormal);
    engine
        .publisher()
        .publish_setting_change(&SettingRow::new("S1", at(1), "threshold", json!(25)))
        .unwrap();

    for sub in [&mut a, &mut b] {
        let kinds: Vec<StreamKind> = drain(sub).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![StreamKind::SensorNew, StreamKind::AlertNew, StreamKind::SettingNew]
        );
    }
}
