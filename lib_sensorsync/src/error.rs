//! # Error Types
//!
//! Every fallible path in the engine returns one of these enums. Only
//! `ConfigError` and a store failure during `SyncEngine::connect` are fatal;
//! the rest are logged and absorbed by the poll/stats loops.

use thiserror::Error;

/// Failures reported by a `SensorStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection could be obtained from the pool.
    #[error("Failed to get connection from pool: {0}")]
    Pool(String),

    /// The query reached the store but failed there.
    #[error("Query execution failed: {0}")]
    Query(String),

    /// The store is (temporarily) not reachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A row came back but a column could not be decoded.
    #[error("Failed to decode {collection} row: {reason}")]
    Decode {
        collection: &'static str,
        reason: String,
    },
}

/// Why a raw store row could not be turned into a viewer record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("{0} row has no sensor identifier")]
    MissingSensorId(&'static str),

    #[error("{kind} row for sensor {sensor_id} has no timestamp")]
    MissingTimestamp {
        kind: &'static str,
        sensor_id: String,
    },
}

/// Rejected engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    InvalidInterval { name: &'static str },

    #[error("{name} must be greater than zero")]
    InvalidLimit { name: &'static str },

    #[error("{name} must not exceed {max}")]
    OutOfRange { name: &'static str, max: u64 },

    #[error("Unknown display timezone: {0}")]
    InvalidTimezone(String),
}

/// Errors surfaced by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Subscriber {0} is already connected")]
    DuplicateSubscriber(u64),

    #[error("Subscriber {0} is not connected")]
    UnknownSubscriber(u64),

    #[error("Malformed record: {0}")]
    Malformed(#[from] FormatError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}
