//! # lib_sensorsync
//!
//! The synchronization and broadcast engine behind the live sensor dashboard.
//! It polls a telemetry store (temperature readings, alerts, setting changes and
//! personality/bias changes), detects genuinely new data with per-sensor
//! watermarks, and keeps every connected viewer in step with a
//! "full snapshot, then deltas" message stream.
//!
//! ## Layout
//!
//! - **`models`**: raw store rows, viewer-facing records and stats payloads.
//! - **`store`**: the read-only `SensorStore` seam plus the PostgreSQL and
//!   in-memory adapters.
//! - **`core`**: evaluator, watermarks, formatter, dispatcher, scheduler,
//!   stats collector, registry and publisher.
//! - **`engine`**: `SyncEngine`, which owns and wires the `core` components.
//! - **`configs`**: `EngineConfig` and its validation.
//! - **`connections`**: PostgreSQL pool creation (feature `postgres`).
//! - **`utils`**: process sampling and timezone helpers.
//!
//! ## Pushing records
//!
//! An in-process ingester that writes a row to the store can announce it
//! immediately through `engine.publisher()` (`publish_reading`,
//! `publish_alert`, ...); viewers get the matching `*-new` message without
//! waiting for the next poll tick.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod configs;
#[cfg(feature = "postgres")]
pub mod connections;
pub mod core;
pub mod engine;
pub mod error;
pub mod models;
pub mod store;
pub mod utils;

// --- Public API Re-exports ---
pub use configs::EngineConfig;
pub use crate::core::dispatcher::{Envelope, StreamKind, SubscriberId, Subscription};
pub use engine::SyncEngine;
pub use error::{ConfigError, EngineError, FormatError, StoreError};
pub use store::{Collection, SensorStore};
