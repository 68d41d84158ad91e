//! # Broadcast Dispatcher
//!
//! Fan-out point between the engine and its viewers. Every connected viewer
//! owns the receiving half of an unbounded channel; the dispatcher keeps the
//! sending halves.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: a broadcast payload is serialized once and wrapped
//!     in an `Arc<Envelope>`. Each viewer receives a clone of the pointer, never
//!     of the data.
//!
//! 2.  **Snapshot First**: `attach` and `resync` push a viewer's full snapshot
//!     while holding the client-list lock, so no broadcast can slip in between
//!     the snapshot and the viewer's registration.
//!
//! 3.  **Snapshot Floors**: each viewer remembers, per sensor, the newest
//!     reading its latest snapshot contained. A `sensor-delta` whose newest
//!     reading is not past that floor is skipped for that viewer.
//!
//! 4.  **Best Effort**: a send to a closed channel is logged and ignored. The
//!     handle stays until the registry detaches it on disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::EngineError;

/// Connection-scoped viewer identifier.
pub type SubscriberId = u64;

/// Per-sensor newest reading timestamps seen in a snapshot.
pub type SnapshotFloors = HashMap<String, DateTime<Utc>>;

/// # Stream Kind
///
/// The `type` tag of every outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    SensorFull,
    SensorDelta,
    AlertsFull,
    AlertsDelta,
    SettingsFull,
    SettingsDelta,
    PersonalityFull,
    PersonalityDelta,
    Heartbeat,
    ServerStats,
    PerformanceStats,
    DataStats,
    SensorNew,
    AlertNew,
    SettingNew,
    PersonalityNew,
}

/// Identifies the sensor and newest reading carried by a `sensor-*` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorMark {
    pub sensor_id: String,
    pub newest: DateTime<Utc>,
}

/// # Envelope
///
/// The unit placed on a viewer's channel. On the wire it is
/// `{"type": <kind>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    #[serde(rename = "data")]
    pub payload: Value,
    #[serde(skip)]
    pub mark: Option<SensorMark>,
}

impl Envelope {
    pub fn new<T: Serialize + ?Sized>(kind: StreamKind, payload: &T) -> Result<Self, EngineError> {
        Ok(Self {
            kind,
            payload: serde_json::to_value(payload)?,
            mark: None,
        })
    }

    pub fn with_mark(mut self, sensor_id: &str, newest: DateTime<Utc>) -> Self {
        self.mark = Some(SensorMark {
            sensor_id: sensor_id.to_string(),
            newest,
        });
        self
    }

    /// Wire representation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Receiving side handed to the transport for one viewer.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::UnboundedReceiver<Arc<Envelope>>,
}

struct ClientHandle {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<Arc<Envelope>>,
    floors: SnapshotFloors,
}

impl ClientHandle {
    fn push(&self, envelope: Arc<Envelope>) -> bool {
        match self.sender.send(envelope) {
            Ok(()) => true,
            Err(_) => {
                debug!(subscriber = self.id, "Send to closed channel ignored");
                false
            }
        }
    }

    fn wants(&mut self, envelope: &Envelope) -> bool {
        let (StreamKind::SensorDelta, Some(mark)) = (envelope.kind, &envelope.mark) else {
            return true;
        };
        match self.floors.get(&mark.sensor_id) {
            Some(floor) if *floor >= mark.newest => false,
            Some(_) => {
                self.floors.remove(&mark.sensor_id);
                true
            }
            None => true,
        }
    }
}

/// # Core Dispatcher
#[derive(Default)]
pub struct Dispatcher {
    clients: Mutex<Vec<ClientHandle>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Attach
    ///
    /// Registers a viewer and queues its snapshot ahead of anything else.
    pub fn attach(
        &self,
        id: SubscriberId,
        snapshot: Vec<Envelope>,
        floors: SnapshotFloors,
    ) -> Result<Subscription, EngineError> {
        let mut clients = self.lock();
        if clients.iter().any(|c| c.id == id) {
            return Err(EngineError::DuplicateSubscriber(id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ClientHandle { id, sender: tx, floors };
        let queued = snapshot.len();
        for envelope in snapshot {
            handle.push(Arc::new(envelope));
        }
        clients.push(handle);

        info!(subscriber = id, queued, "Subscriber attached");
        Ok(Subscription { id, receiver: rx })
    }

    /// Unicasts a fresh snapshot and replaces the viewer's floors.
    pub fn resync(
        &self,
        id: SubscriberId,
        snapshot: Vec<Envelope>,
        floors: SnapshotFloors,
    ) -> Result<(), EngineError> {
        let mut clients = self.lock();
        let client = clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(EngineError::UnknownSubscriber(id))?;

        for envelope in snapshot {
            client.push(Arc::new(envelope));
        }
        client.floors = floors;
        Ok(())
    }

    pub fn send_to(&self, id: SubscriberId, envelope: Envelope) -> Result<(), EngineError> {
        let clients = self.lock();
        let client = clients
            .iter()
            .find(|c| c.id == id)
            .ok_or(EngineError::UnknownSubscriber(id))?;
        client.push(Arc::new(envelope));
        Ok(())
    }

    /// # Broadcast
    ///
    /// Delivers `envelope` to every attached viewer that wants it. Returns the
    /// number of viewers it was queued for.
    pub fn broadcast(&self, envelope: Envelope) -> usize {
        let envelope = Arc::new(envelope);
        let mut clients = self.lock();
        let mut delivered = 0;
        for client in clients.iter_mut() {
            if client.wants(&envelope) && client.push(Arc::clone(&envelope)) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Removes a viewer. Returns `false` if it was not attached.
    pub fn detach(&self, id: SubscriberId) -> bool {
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|c| c.id != id);
        let removed = clients.len() != before;
        if removed {
            info!(subscriber = id, "Subscriber detached");
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ClientHandle>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
