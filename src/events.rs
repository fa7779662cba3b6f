// src/events.rs
//
// In-process publish/subscribe fabric for channel events.
// Subscribers receive events through bounded queues; a subscriber whose
// queue is full (or whose receiver was dropped) is detached on the spot so
// publishers never block. Delivery is at-most-once with no backlog for new
// subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::channel::buffer::LineEntry;
use crate::channel::config::PortConfig;
use crate::decoders::DecodedFrame;
use crate::ports::PortInfo;

/// Queue depth per subscriber. A live WebSocket drains far faster than a
/// serial line can fill this; hitting the cap means the subscriber is gone
/// or wedged, and it gets detached.
const SUBSCRIBER_QUEUE_CAP: usize = 1024;

/// One event on the bus. Every variant except `PortsChanged` names the
/// originating channel.
#[derive(Clone, Debug)]
pub enum MonitorEvent {
    /// A framed line (rx or tx) was appended to a channel buffer.
    Line {
        channel_id: String,
        entry: LineEntry,
        /// Present only when at least one decoder matched the rx bytes.
        decoded: Option<Vec<DecodedFrame>>,
    },
    /// Raw pre-framing bytes as read from the device, hex encoded.
    RawData {
        channel_id: String,
        hex: String,
        timestamp: u64,
    },
    Connected {
        channel_id: String,
        config: PortConfig,
    },
    Disconnected {
        channel_id: String,
    },
    Error {
        channel_id: String,
        message: String,
    },
    Cleared {
        channel_id: String,
    },
    PortsChanged {
        ports: Vec<PortInfo>,
    },
}

struct BusInner {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<MonitorEvent>>>,
    next_id: AtomicU64,
}

/// Cloneable handle onto the shared bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a new subscriber. It sees every event published after this
    /// call, in publication order; nothing is replayed.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAP);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.inner.subscribers.lock() {
            subs.insert(id, tx);
        }
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live subscriber. Subscribers that cannot
    /// accept it (full or closed queue) are detached immediately.
    pub fn publish(&self, event: MonitorEvent) {
        let mut dead: Vec<u64> = Vec::new();
        if let Ok(subs) = self.inner.subscribers.lock() {
            for (&id, tx) in subs.iter() {
                if tx.try_send(event.clone()).is_err() {
                    dead.push(id);
                }
            }
        }
        if !dead.is_empty() {
            if let Ok(mut subs) = self.inner.subscribers.lock() {
                for id in dead {
                    subs.remove(&id);
                    tlog!("[bus] Detached subscriber {} (queue full or closed)", id);
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

/// Live receiver half of a bus subscription.
/// Dropping it detaches the subscriber on the publisher's next delivery.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<MonitorEvent>,
    bus: std::sync::Weak<BusInner>,
}

impl Subscription {
    /// Receive the next event, or `None` once detached.
    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for draining in tests.
    pub fn try_recv(&mut self) -> Option<MonitorEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Eager removal; publishers would also prune on the next try_send
        if let Some(inner) = self.bus.upgrade() {
            if let Ok(mut subs) = inner.subscribers.lock() {
                subs.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(id: &str) -> MonitorEvent {
        MonitorEvent::Cleared {
            channel_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_in_publication_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(cleared("a"));
        bus.publish(cleared("b"));

        match sub.recv().await {
            Some(MonitorEvent::Cleared { channel_id }) => assert_eq!(channel_id, "a"),
            other => panic!("unexpected event: {:?}", other),
        }
        match sub.recv().await {
            Some(MonitorEvent::Cleared { channel_id }) => assert_eq!(channel_id, "b"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_backlog_for_late_subscribers() {
        let bus = EventBus::new();
        bus.publish(cleared("early"));

        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_is_detached() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        // Overfill the queue without draining; the publish that finds it
        // full must drop the subscriber rather than block.
        for _ in 0..(SUBSCRIBER_QUEUE_CAP + 1) {
            bus.publish(cleared("x"));
        }
        assert_eq!(bus.subscriber_count(), 0);

        // The queued events up to the cap are still readable
        let mut drained = 0;
        while sub.try_recv().is_some() {
            drained += 1;
        }
        assert_eq!(drained, SUBSCRIBER_QUEUE_CAP);
    }

    #[tokio::test]
    async fn dropped_subscription_detaches() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        // Publishing to nobody is fine
        bus.publish(cleared("x"));
    }
}
