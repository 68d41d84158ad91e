//! # Subscriber Registry
//!
//! Reference-counted viewer membership. The first viewer starts the poll and
//! stats loops, the last one to leave cancels them through their shared
//! `CancellationToken`.
//!
//! Joining holds the cycle gate while the snapshot is built and attached, so
//! no tick can broadcast between the snapshot read and the viewer's
//! registration.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::dispatcher::{Dispatcher, SubscriberId, Subscription};
use crate::core::scheduler::{CycleGate, PollScheduler};
use crate::core::snapshot::SnapshotBuilder;
use crate::core::stats::StatsCollector;
use crate::error::EngineError;

struct Loops {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryState {
    members: HashSet<SubscriberId>,
    loops: Option<Loops>,
}

pub struct Registry {
    dispatcher: Arc<Dispatcher>,
    snapshots: SnapshotBuilder,
    scheduler: Arc<PollScheduler>,
    stats: Arc<StatsCollector>,
    gate: CycleGate,
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        snapshots: SnapshotBuilder,
        scheduler: Arc<PollScheduler>,
        stats: Arc<StatsCollector>,
        gate: CycleGate,
    ) -> Self {
        Self {
            dispatcher,
            snapshots,
            scheduler,
            stats,
            gate,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// # On Connect
    ///
    /// Registers `id`, queues its full snapshot and starts the loops when it
    /// is the first viewer.
    pub async fn on_connect(&self, id: SubscriberId) -> Result<Subscription, EngineError> {
        let mut state = self.state.lock().await;
        if state.members.contains(&id) {
            return Err(EngineError::DuplicateSubscriber(id));
        }

        let subscription = {
            let _gate = self.gate.lock().await;
            let snapshot = self.snapshots.build().await;
            self.dispatcher.attach(id, snapshot.envelopes, snapshot.floors)?
        };

        state.members.insert(id);
        info!(subscriber = id, total = state.members.len(), "Client connected");

        if state.loops.is_none() {
            state.loops = Some(self.start_loops());
        }
        Ok(subscription)
    }

    /// Removes `id`; cancels the loops when nobody is left.
    pub async fn on_disconnect(&self, id: SubscriberId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if !state.members.remove(&id) {
            return Err(EngineError::UnknownSubscriber(id));
        }
        self.dispatcher.detach(id);
        info!(subscriber = id, total = state.members.len(), "Client disconnected");

        if state.members.is_empty() {
            if let Some(loops) = state.loops.take() {
                loops.token.cancel();
                info!("No clients left, data polling and stats stopped");
            }
        }
        Ok(())
    }

    /// Unicasts a fresh snapshot and resets the viewer's snapshot floors.
    pub async fn on_request_full_sync(&self, id: SubscriberId) -> Result<(), EngineError> {
        self.ensure_member(id).await?;
        debug!(subscriber = id, "Full sync requested");
        let _gate = self.gate.lock().await;
        let snapshot = self.snapshots.build().await;
        self.dispatcher.resync(id, snapshot.envelopes, snapshot.floors)
    }

    /// Unicasts the three stats messages.
    pub async fn on_request_server_stats(&self, id: SubscriberId) -> Result<(), EngineError> {
        self.ensure_member(id).await?;
        debug!(subscriber = id, "Server stats requested");
        self.stats.send_to(id).await
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.loops.is_some()
    }

    /// Detaches every viewer, cancels the loops and waits for them to exit.
    pub async fn shutdown(&self) {
        let loops = {
            let mut state = self.state.lock().await;
            for id in state.members.drain() {
                self.dispatcher.detach(id);
            }
            state.loops.take()
        };
        if let Some(loops) = loops {
            loops.token.cancel();
            for handle in loops.handles {
                let _ = handle.await;
            }
        }
        info!("Registry shut down");
    }

    async fn ensure_member(&self, id: SubscriberId) -> Result<(), EngineError> {
        if self.state.lock().await.members.contains(&id) {
            Ok(())
        } else {
            Err(EngineError::UnknownSubscriber(id))
        }
    }

    fn start_loops(&self) -> Loops {
        let token = CancellationToken::new();
        let handles = vec![
            tokio::spawn(Arc::clone(&self.scheduler).run(token.clone())),
            tokio::spawn(Arc::clone(&self.stats).run(token.clone())),
        ];
        info!("First client connected, data polling and stats started");
        Loops { token, handles }
    }
}
