use serde::{Deserialize, Serialize};

/// Requests a viewer may send over its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    RequestFullSync,
    RequestServerStats,
}
