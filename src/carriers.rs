//! Bounded data carriers (§2, §5): a thread-safe FIFO queue for the
//! orchestrator's receive→dispatch handoff, and a thread-safe registry for
//! the service table.
//!
//! The queue wraps `crossbeam::channel`, matching the teacher's existing use
//! of `crossbeam` for cross-thread handoff; it replaces the reference's
//! hand-rolled `SafeQueue` (mutex + condition variable over `std::queue`)
//! with the idiomatic Rust equivalent of the same contract: `enqueue` never
//! blocks, `dequeue` blocks until an item is available.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::wire::ControlMessage;

/// How often a blocked `dequeue` wakes up to re-check its caller's shutdown
/// flag, matching `transport::RECV_POLL_INTERVAL` (§5).
const DEQUEUE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A received control message paired with the peer address it arrived
/// from (§4.3 receive loop).
pub type Inbound = (ControlMessage, SocketAddr);

/// The `(received, peer)` handoff queue between the orchestrator's receive
/// thread and its dispatch thread (§5).
pub struct InboundQueue {
    tx: Sender<Inbound>,
    rx: Receiver<Inbound>,
}

impl InboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        InboundQueue { tx, rx }
    }

    /// Never blocks; wakes one waiting `dequeue` (§4.2 SafeQueue contract).
    pub fn enqueue(&self, item: Inbound) {
        // An unbounded channel's send only fails if every receiver has been
        // dropped, which only happens at shutdown; there is nothing useful
        // to do with the item at that point.
        let _ = self.tx.send(item);
    }

    /// Blocks until an item is available, or returns `None` once every
    /// sender has been dropped (shutdown).
    pub fn dequeue(&self) -> Option<Inbound> {
        self.rx.recv().ok()
    }

    /// Blocks for at most `DEQUEUE_POLL_INTERVAL` waiting for an item.
    /// Returns `Some(Some(item))` on a delivered item, `Some(None)` if the
    /// wait simply timed out (the caller should re-check its shutdown flag
    /// and call again), or `None` once every sender has been dropped.
    pub fn dequeue_timeout(&self) -> Option<Option<Inbound>> {
        match self.rx.recv_timeout(DEQUEUE_POLL_INTERVAL) {
            Ok(item) => Some(Some(item)),
            Err(channel::RecvTimeoutError::Timeout) => Some(None),
            Err(channel::RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The orchestrator's service registry (§3, §4.3): `service_id -> last-seen
/// message`. Entries are inserted on first `SYNC_REQUEST` and never removed
/// during the experiment (§3 lifecycle; `RM_CLIENT_RELEASE` is parsed but
/// ignored per the §9 decision).
#[derive(Default)]
pub struct ServiceRegistry {
    // The map is a by-value snapshot per §9: the orchestrator must not hold
    // a reference into the client's own state, only the last message (and
    // the peer address to reply to) it saw.
    services: RwLock<HashMap<u64, (ControlMessage, SocketAddr)>>,
    // Insertion order matters for the synchronous start path (§4.3): each
    // service's start timestamp stacks on top of the previous one.
    order: Mutex<Vec<u64>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service_id` if unseen, and always updates the retained
    /// last-seen message (§4.3: "retain the last-seen message for that
    /// service"). Returns `true` if this was a first sighting.
    pub fn observe(&self, service_id: u64, msg: ControlMessage, peer: SocketAddr) -> bool {
        let mut services = self.services.write().unwrap();
        let first_sight = !services.contains_key(&service_id);
        services.insert(service_id, (msg, peer));
        drop(services);
        if first_sight {
            self.order.lock().unwrap().push(service_id);
        }
        first_sight
    }

    pub fn last_seen(&self, service_id: u64) -> Option<(ControlMessage, SocketAddr)> {
        self.services.read().unwrap().get(&service_id).cloned()
    }

    /// All registered service ids in first-sighting (insertion) order.
    pub fn ordered_service_ids(&self) -> Vec<u64> {
        self.order.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MessageKind, ProtocolId, RmPayload};
    use crate::clock::Timestamp;

    fn msg(source_id: u32) -> ControlMessage {
        ControlMessage {
            kind: MessageKind::RmClientSyncRequest,
            priority: 0,
            source_id,
            destination_id: 0,
            service_id: 1,
            mode: 0,
            send_time_point: Timestamp::ZERO,
            protocol_id: ProtocolId::None,
            payload: RmPayload::default(),
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn first_sighting_inserts_subsequent_updates_template() {
        let registry = ServiceRegistry::new();
        assert!(registry.observe(1, msg(10), peer()));
        assert!(!registry.observe(1, msg(20), peer()));
        assert_eq!(registry.last_seen(1).unwrap().0.source_id, 20);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ordered_service_ids_preserves_insertion_order() {
        let registry = ServiceRegistry::new();
        registry.observe(3, msg(1), peer());
        registry.observe(1, msg(2), peer());
        registry.observe(2, msg(3), peer());
        assert_eq!(registry.ordered_service_ids(), vec![3, 1, 2]);
    }

    #[test]
    fn dequeue_blocks_until_enqueue() {
        let queue = std::sync::Arc::new(InboundQueue::new());
        let q2 = queue.clone();
        let handle = std::thread::spawn(move || q2.dequeue());
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.enqueue((msg(1), "127.0.0.1:0".parse().unwrap()));
        let (received, _) = handle.join().unwrap().unwrap();
        assert_eq!(received.source_id, 1);
    }
}
