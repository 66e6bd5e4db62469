//! # Version Broadcast Hub
//!
//! Owns the set of push subscribers from a single task. Instead of relaying
//! every write, the hub polls the index's version counter on a fixed cadence
//! and fans out at most one `VERSION_UPDATE` per tick, collapsing write
//! storms into a bounded broadcast cost. Structural changes to the
//! subscriber set travel through register/unregister channels, so no lock is
//! ever held across socket I/O.
//!
//! A subscriber moves through four states: pending (register request sent),
//! registered (in the map, receiving broadcasts), closing (unregister
//! requested or its queue was found closed), closed (queue dropped; the
//! write pump observes the closure and emits a close frame).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connections::RankingIndex;

/// Cadence of the version poll.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
/// Outbound queue depth per subscriber.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Deadline for handing the initial version to a fresh subscriber.
const SUBSCRIBE_DEADLINE: Duration = Duration::from_secs(2);

/// The one frame shape the push channel emits.
#[derive(Debug, Serialize)]
pub struct VersionUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: u64,
}

impl VersionUpdate {
    fn frame(version: u64) -> String {
        serde_json::to_string(&VersionUpdate {
            kind: "VERSION_UPDATE",
            version,
        })
        .expect("version update serialization cannot fail")
    }
}

/// Tuning knobs; production uses the defaults, tests shrink them.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub heartbeat: Duration,
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat: HEARTBEAT_INTERVAL,
            queue_capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
}

/// One registered push subscriber, as seen by its socket pumps.
pub struct Subscription {
    pub id: u64,
    /// Serialized frames to forward to the socket. Channel closure is the
    /// close sentinel.
    pub outbound: mpsc::Receiver<String>,
}

struct RegisterRequest {
    id: u64,
    queue: mpsc::Sender<String>,
}

/// Version broadcaster and subscriber registry.
pub struct Hub<I> {
    index: Arc<I>,
    config: HubConfig,
    register_tx: mpsc::Sender<RegisterRequest>,
    register_rx: Mutex<Option<mpsc::Receiver<RegisterRequest>>>,
    unregister_tx: mpsc::Sender<u64>,
    unregister_rx: Mutex<Option<mpsc::Receiver<u64>>>,
    next_id: AtomicU64,
    client_count: AtomicUsize,
}

impl<I: RankingIndex> Hub<I> {
    pub fn new(index: Arc<I>) -> Self {
        Self::with_config(index, HubConfig::default())
    }

    pub fn with_config(index: Arc<I>, config: HubConfig) -> Self {
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::channel(64);
        Self {
            index,
            config,
            register_tx,
            register_rx: Mutex::new(Some(register_rx)),
            unregister_tx,
            unregister_rx: Mutex::new(Some(unregister_rx)),
            next_id: AtomicU64::new(1),
            client_count: AtomicUsize::new(0),
        }
    }

    /// Registers a new subscriber and returns its outbound queue. The hub
    /// loop enqueues the current version onto it shortly after.
    pub async fn subscribe(&self) -> Result<Subscription, HubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, outbound) = mpsc::channel(self.config.queue_capacity);
        self.register_tx
            .send(RegisterRequest { id, queue })
            .await
            .map_err(|_| HubError::Closed)?;
        Ok(Subscription { id, outbound })
    }

    /// Removes a subscriber and closes its outbound queue.
    pub async fn unsubscribe(&self, id: u64) {
        if self.unregister_tx.send(id).await.is_err() {
            debug!(subscriber = id, "unsubscribe after hub stopped");
        }
    }

    /// Currently registered subscriber count.
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// The hub loop. Single owner of the subscriber map; runs until the
    /// token fires. Call once.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut register_rx = self
            .register_rx
            .lock()
            .expect("hub lock poisoned")
            .take()
            .expect("hub loop already started");
        let mut unregister_rx = self
            .unregister_rx
            .lock()
            .expect("hub lock poisoned")
            .take()
            .expect("hub loop already started");

        let mut clients: HashMap<u64, mpsc::Sender<String>> = HashMap::new();

        // Prime the change detector so a hub started against an already
        // populated index does not broadcast on its first tick.
        let mut last_version = match self.index.version().await {
            Ok(version) => version,
            Err(err) => {
                warn!(%err, "could not read initial version, starting from 0");
                0
            }
        };

        let mut ticker = tokio::time::interval(self.config.heartbeat);
        info!("version hub started");

        loop {
            tokio::select! {
                Some(request) = register_rx.recv() => {
                    self.handle_register(&mut clients, request, last_version).await;
                }
                Some(id) = unregister_rx.recv() => {
                    if clients.remove(&id).is_some() {
                        self.client_count.store(clients.len(), Ordering::Relaxed);
                        info!(subscriber = id, total = clients.len(), "subscriber disconnected");
                    }
                }
                _ = ticker.tick() => {
                    self.broadcast_if_changed(&mut clients, &mut last_version).await;
                }
                _ = shutdown.cancelled() => {
                    info!("version hub shutting down");
                    return;
                }
            }
        }
    }

    async fn handle_register(
        &self,
        clients: &mut HashMap<u64, mpsc::Sender<String>>,
        request: RegisterRequest,
        last_version: u64,
    ) {
        let id = request.id;
        clients.insert(id, request.queue.clone());
        self.client_count.store(clients.len(), Ordering::Relaxed);
        info!(subscriber = id, total = clients.len(), "subscriber connected");

        // Hand the newcomer the current version so it can render without
        // waiting for the next change. Abandon the attempt if the queue
        // stays unwritable past the deadline.
        let version = match self.index.version().await {
            Ok(version) => version.max(last_version),
            Err(err) => {
                error!(%err, "failed to read version for new subscriber");
                return;
            }
        };
        let send = request.queue.send(VersionUpdate::frame(version));
        if tokio::time::timeout(SUBSCRIBE_DEADLINE, send).await.is_err() {
            warn!(subscriber = id, "timed out sending initial version");
        }
    }

    async fn broadcast_if_changed(
        &self,
        clients: &mut HashMap<u64, mpsc::Sender<String>>,
        last_version: &mut u64,
    ) {
        let version = match self.index.version().await {
            Ok(version) => version,
            Err(err) => {
                error!(%err, "failed to poll leaderboard version");
                return;
            }
        };
        if version <= *last_version {
            return;
        }
        *last_version = version;
        debug!(version, subscribers = clients.len(), "version changed, broadcasting");

        let frame = VersionUpdate::frame(version);
        let mut gone = Vec::new();
        for (id, queue) in clients.iter() {
            match queue.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: skip this tick, keep the subscriber.
                    warn!(subscriber = id, "outbound queue full, skipping");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    gone.push(*id);
                }
            }
        }
        for id in gone {
            clients.remove(&id);
            debug!(subscriber = id, "removed subscriber with closed queue");
        }
        self.client_count.store(clients.len(), Ordering::Relaxed);
    }
}
