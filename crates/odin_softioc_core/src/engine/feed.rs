//! Sync event feed.
//!
//! Every write the engine applies is published here after it is stored,
//! while the node lock is still held, so subscribers see per-node events in
//! the order the writes were serialized. Sending only takes the feed's read
//! lock, so writes to different nodes can publish at the same time.
//!
//! Each subscriber has a bounded queue. When a subscriber falls behind, new
//! events for it are dropped rather than blocking the writer.

use crate::node::SyncEvent;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

struct Subscriber {
    tx: SyncSender<SyncEvent>,
    connected: AtomicBool,
}

/// Distributes sync events to subscribers.
pub struct EventFeed {
    subscribers: RwLock<Vec<Subscriber>>,
    capacity: usize,
    has_disconnected: AtomicBool,
    dropped: AtomicU64,
}

impl EventFeed {
    /// Creates a feed buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
            has_disconnected: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::sync_channel(self.capacity);
        self.subscribers.write().push(Subscriber {
            tx,
            connected: AtomicBool::new(true),
        });
        rx
    }

    /// Sends an event to every live subscriber without blocking.
    pub fn emit(&self, event: &SyncEvent) {
        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                if !subscriber.connected.load(Ordering::Relaxed) {
                    continue;
                }
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(node = %event.node, "subscriber lagging, event dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        subscriber.connected.store(false, Ordering::Relaxed);
                        self.has_disconnected.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
        if self.has_disconnected.swap(false, Ordering::Relaxed) {
            self.subscribers
                .write()
                .retain(|subscriber| subscriber.connected.load(Ordering::Relaxed));
        }
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns how many events were dropped for lagging subscribers.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Origin;
    use crate::value::ParamValue;
    use std::time::SystemTime;

    fn event(value: i64) -> SyncEvent {
        SyncEvent {
            node: "a".into(),
            value: ParamValue::Int(value),
            origin: Origin::Control,
            timestamp: SystemTime::now(),
        }
    }

    #[test]
    fn subscribers_receive_events_in_order() {
        let feed = EventFeed::default();
        let rx = feed.subscribe();
        feed.emit(&event(1));
        feed.emit(&event(2));

        assert_eq!(rx.recv().unwrap().value, ParamValue::Int(1));
        assert_eq!(rx.recv().unwrap().value, ParamValue::Int(2));
    }

    #[test]
    fn dropped_subscribers_are_removed() {
        let feed = EventFeed::default();
        let rx = feed.subscribe();
        let _keep = feed.subscribe();
        drop(rx);

        feed.emit(&event(1));
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn lagging_subscriber_does_not_block_or_grow() {
        let feed = EventFeed::new(2);
        let slow = feed.subscribe();
        for value in 0..10 {
            feed.emit(&event(value));
        }

        assert_eq!(feed.dropped_events(), 8);
        let received: Vec<ParamValue> = slow.try_iter().map(|e| e.value).collect();
        assert_eq!(received, [ParamValue::Int(0), ParamValue::Int(1)]);

        // space frees up once the subscriber drains
        feed.emit(&event(10));
        assert_eq!(slow.try_recv().unwrap().value, ParamValue::Int(10));
    }
}
