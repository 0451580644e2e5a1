/**
 * BROADCAST HUB - Snapshot fan-out to live subscribers
 *
 * ROLE: keeps one bounded queue per subscriber and pushes the full host
 * snapshot into each of them, on every cycle, on connect, and on demand.
 *
 * OPERATION:
 * - subscribe() registers a queue and seeds it with the current snapshot
 * - publish() try_sends into every queue; a full or closed queue means the
 *   subscriber is dead or too slow, it is unregistered on the spot
 * - all queue writes happen under the subscriber lock, so each subscriber
 *   sees snapshots in publish order
 */

use crate::models::Snapshot;
use crate::registry::HostRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type SnapshotTx = mpsc::Sender<Arc<Snapshot>>;

#[derive(Clone)]
pub struct BroadcastHub {
    registry: HostRegistry,
    subscribers: Arc<Mutex<HashMap<SubscriberId, SnapshotTx>>>,
    buffer: usize,
}

/// Receiving end of one subscriber. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<Snapshot>>,
    hub: BroadcastHub,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next snapshot; `None` once the hub dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

impl BroadcastHub {
    pub fn new(registry: HostRegistry, buffer: usize) -> Self {
        Self {
            registry,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Registers a subscriber and queues the current snapshot for it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = SubscriberId(Uuid::new_v4());
        {
            let mut subs = self.subscribers.lock();
            // fresh queue with capacity >= 1, cannot fail
            let _ = tx.try_send(Arc::new(self.registry.snapshot()));
            subs.insert(id, tx);
            info!("[hub] subscriber {id} connected ({} active)", subs.len());
        }
        Subscription { id, rx, hub: self.clone() }
    }

    /// Idempotent; returns whether the subscriber was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.lock();
        let removed = subs.remove(&id).is_some();
        if removed {
            info!("[hub] subscriber {id} left ({} active)", subs.len());
        }
        removed
    }

    /// Sends `snapshot` to every subscriber, dropping the ones that cannot
    /// take it. Returns the number of successful deliveries.
    pub fn publish(&self, snapshot: Snapshot) -> usize {
        let snapshot = Arc::new(snapshot);
        let mut subs = self.subscribers.lock();
        deliver_all(&mut subs, &snapshot)
    }

    /// Snapshot taken under the subscriber lock, so a concurrent subscribe
    /// cannot receive a newer state before an older one.
    pub fn publish_current(&self) -> usize {
        let mut subs = self.subscribers.lock();
        let snapshot = Arc::new(self.registry.snapshot());
        deliver_all(&mut subs, &snapshot)
    }

    /// Out-of-cycle snapshot for one subscriber only. Returns false if the
    /// subscriber is gone or was dropped because its queue is full.
    pub fn refresh(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.lock();
        let Some(tx) = subs.get(&id) else {
            return false;
        };
        match tx.try_send(Arc::new(self.registry.snapshot())) {
            Ok(()) => true,
            Err(e) => {
                warn!("[hub] dropping subscriber {id} on refresh: {}", reason(&e));
                subs.remove(&id);
                false
            }
        }
    }

    /// Drops every queue; subscribers observe end-of-stream.
    pub fn close_all(&self) {
        let mut subs = self.subscribers.lock();
        let n = subs.len();
        subs.clear();
        info!("[hub] closed {n} subscriber channels");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

fn deliver_all(subs: &mut HashMap<SubscriberId, SnapshotTx>, snapshot: &Arc<Snapshot>) -> usize {
    let before = subs.len();
    subs.retain(|id, tx| match tx.try_send(snapshot.clone()) {
        Ok(()) => true,
        Err(e) => {
            warn!("[hub] dropping subscriber {id}: {}", reason(&e));
            false
        }
    });
    debug!("[hub] published {} hosts to {}/{} subscribers", snapshot.len(), subs.len(), before);
    subs.len()
}

fn reason<T>(e: &TrySendError<T>) -> &'static str {
    match e {
        TrySendError::Full(_) => "queue full",
        TrySendError::Closed(_) => "channel closed",
    }
}
