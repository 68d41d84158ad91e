//! # Data Model
//!
//! Two families of types live here:
//!
//! - **Rows** (`rows`): what the store hands back. Every column is optional
//!   because ingestion writes loosely shaped documents; nothing is trusted.
//! - **Records** (`records`, `stats`): what viewers receive. Built only by the
//!   formatter, so derived fields (abnormality, content, display date/time)
//!   are always present and consistent.

/// Raw rows as returned by a `SensorStore`.
pub mod rows;
/// Viewer-facing records and batch payloads.
pub mod records;
/// Server, performance and data statistics payloads.
pub mod stats;

pub use records::{Alert, Heartbeat, PersonalityBias, Reading, SensorBatch, SettingChange};
pub use rows::{AlertRow, PersonalityRow, ReadingRow, SettingRow, StoreRow};
pub use stats::{DataStats, PerformanceStats, ServerStats, StatsBundle};

/// Opaque identifier of a physical sensor, stable across all streams.
pub type SensorId = String;

/// Logical number of temperature channels per reading.
pub const TEMPERATURE_CHANNELS: usize = 16;
