//! # Store Adapter
//!
//! Read-only query surface over the four telemetry collections. The engine
//! only ever talks to a `dyn SensorStore`; concrete adapters are:
//!
//! - `MemoryStore`: in-process, with fault injection. Used by tests and demos.
//! - `PostgresStore` (feature `postgres`): `deadpool-postgres` backed.
//!
//! Every method may fail with a `StoreError`. Callers treat a failure as "no
//! data for this unit" and carry on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{AlertRow, PersonalityRow, ReadingRow, SettingRow};

/// In-memory adapter.
pub mod memory;
/// PostgreSQL adapter.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// The four logical collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Readings,
    Alerts,
    SettingChanges,
    PersonalityChanges,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Readings,
        Collection::Alerts,
        Collection::SettingChanges,
        Collection::PersonalityChanges,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Collection::Readings => "temperature_readings",
            Collection::Alerts => "alerts_log",
            Collection::SettingChanges => "settings_history",
            Collection::PersonalityChanges => "personality_history",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// # Sensor Store
///
/// All listings are newest first by ordering timestamp (`created_at`, else
/// `timestamp`).
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Distinct sensor ids present in the readings collection.
    async fn list_sensor_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn latest_readings(&self, sensor_id: &str, limit: usize) -> Result<Vec<ReadingRow>, StoreError>;

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRow>, StoreError>;

    async fn recent_setting_changes(&self, limit: usize) -> Result<Vec<SettingRow>, StoreError>;

    async fn recent_personality_changes(&self, limit: usize) -> Result<Vec<PersonalityRow>, StoreError>;

    async fn count_all(&self, collection: Collection) -> Result<u64, StoreError>;

    /// Rows whose ordering timestamp is at or after `since`.
    async fn count_since(&self, collection: Collection, since: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Distinct sensors with a reading at or after `since`.
    async fn count_active_sensors(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Ordering timestamp of the newest reading overall.
    async fn last_update(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Approximate storage footprint in bytes.
    async fn size_estimate(&self) -> Result<u64, StoreError>;
}
