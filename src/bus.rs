//! In-memory fan-out from the receiver to every attached subscriber.
//!
//! The bus holds one bounded queue per subscriber behind a read-optimized
//! lock. Publishing is a read-side operation that performs exactly one
//! non-blocking enqueue attempt per subscriber; a full queue means the
//! packet is dropped for that subscriber and counted. A stalled subscriber
//! therefore never extends the publisher's critical section and never slows
//! the other subscribers down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::warn;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

use crate::metrics::RelayMetrics;
use crate::packet::Packet;

/// Opaque identity of an attached subscriber, used to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue-full warnings are emitted at most this often per subscriber.
const DROP_WARN_INTERVAL_NS: u64 = 1_000_000_000;

#[derive(Debug)]
struct SubscriberSlot {
    sender: Sender<Arc<Packet>>,
    dropped: AtomicU64,
    last_drop_warn_ns: AtomicU64,
}

/// The subscriber set.
///
/// Attach and detach take the write lock; publish and count take the read
/// lock. Publish holds the read lock across all enqueue attempts so a slot
/// cannot be destroyed while the publisher holds its queue reference, but
/// every operation under the lock is non-blocking.
#[derive(Debug)]
pub struct Bus {
    subscribers: RwLock<HashMap<u64, Arc<SubscriberSlot>>>,
    next_id: AtomicU64,
    metrics: Arc<RelayMetrics>,
    drops_total: prometheus::IntCounter,
}

impl Bus {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        let drops_total = metrics.slow_subscriber_drops();
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            metrics,
            drops_total,
        }
    }

    /// Adds a subscriber queue. O(1).
    pub fn attach(&self, sender: Sender<Arc<Packet>>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(SubscriberSlot {
            sender,
            dropped: AtomicU64::new(0),
            last_drop_warn_ns: AtomicU64::new(0),
        });
        self.subscribers
            .write()
            .expect("bus lock poisoned")
            .insert(id, slot);
        self.metrics.subscriber_count.inc();
        SubscriberId(id)
    }

    /// Removes a subscriber. O(1), idempotent. After this returns the
    /// detached queue receives no further packets.
    pub fn detach(&self, id: SubscriberId) {
        let removed = self
            .subscribers
            .write()
            .expect("bus lock poisoned")
            .remove(&id.0);
        if removed.is_some() {
            self.metrics.subscriber_count.dec();
        }
    }

    /// Detaches every subscriber. Dropping the senders ends each
    /// subscriber's stream once its queue drains; used at shutdown.
    pub fn close(&self) {
        let mut subscribers = self.subscribers.write().expect("bus lock poisoned");
        let count = subscribers.len();
        subscribers.clear();
        self.metrics.subscriber_count.sub(count as i64);
    }

    /// Fans one packet out to every subscriber. Never blocks.
    ///
    /// A full queue drops the packet for that subscriber only. A closed
    /// queue (the subscriber's stream ended) is detached once the read
    /// section is over.
    pub fn publish(&self, packet: Arc<Packet>) {
        let mut closed: Vec<u64> = Vec::new();
        {
            let subscribers = self.subscribers.read().expect("bus lock poisoned");
            for (id, slot) in subscribers.iter() {
                match slot.sender.try_send(Arc::clone(&packet)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let dropped = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        self.drops_total.inc();
                        let now = packet.received_at;
                        let last = slot.last_drop_warn_ns.load(Ordering::Relaxed);
                        if now.saturating_sub(last) >= DROP_WARN_INTERVAL_NS
                            && slot
                                .last_drop_warn_ns
                                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                                .is_ok()
                        {
                            warn!("subscriber {id} queue full, dropping ({dropped} dropped so far)");
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        closed.push(*id);
                    }
                }
            }
        }
        for id in closed {
            self.detach(SubscriberId(id));
        }
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("bus lock poisoned").len()
    }

    /// Packets dropped for a subscriber because its queue was full.
    /// `None` once the subscriber has been detached.
    pub fn dropped(&self, id: SubscriberId) -> Option<u64> {
        self.subscribers
            .read()
            .expect("bus lock poisoned")
            .get(&id.0)
            .map(|slot| slot.dropped.load(Ordering::Relaxed))
    }
}
