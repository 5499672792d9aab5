//! One-producer, many-subscribers message bus with bounded per-subscriber
//! queues, ported from the original's `util/fanout_queue.py` `FanoutQueue`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

/// Handle returned to a subscriber. Yields `Some(T)` for every published
/// message, and ends (`recv` returns `None`) once the bus publishes `None`
/// or the subscriber is explicitly unsubscribed. Cloneable: re-subscribing
/// an id hands out another handle onto the same underlying queue (see
/// `FanoutBus::subscribe`), so two holders race for each item exactly like
/// two tasks calling `get()` on the same `asyncio.Queue` in the original.
pub struct Subscription<T> {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Option<T>>>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Some(msg)) => Some(msg),
            _ => None,
        }
    }
}

struct Subscriber<T> {
    tx: mpsc::Sender<Option<T>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Option<T>>>>,
}

/// Fan-out bus: `publish` enqueues to every subscriber's bounded queue; a
/// full queue drops the message for that subscriber only (never blocks the
/// producer). `close` broadcasts end-of-stream and rejects further
/// publishes.
pub struct FanoutBus<T> {
    subscribers: Mutex<HashMap<String, Subscriber<T>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl<T: Clone + Send + 'static> Default for FanoutBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> FanoutBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Idempotent: re-subscribing an id already present returns a handle
    /// onto that subscriber's existing queue instead of allocating a fresh
    /// one, matching the original's "return the existing queue" semantics.
    pub fn subscribe(&self, id: impl Into<String>, capacity: usize) -> Subscription<T> {
        let id = id.into();
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(existing) = subs.get(&id) {
            return Subscription { rx: existing.rx.clone() };
        }
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        subs.insert(id, Subscriber { tx, rx: rx.clone() });
        Subscription { rx }
    }

    pub fn unsubscribe(&self, id: &str) {
        if let Some(sub) = self.subscribers.lock().unwrap().remove(id) {
            let _ = sub.tx.try_send(None);
        }
    }

    /// Publish to every subscriber. `None` signals end-of-stream.
    /// Never blocks: a full queue drops the message for that subscriber.
    pub fn publish(&self, msg: Option<T>) -> crate::error::Result<()> {
        if self.is_closed() {
            return Err(crate::error::PalabraError::Transport(
                "FanoutBus is closed".into(),
            ));
        }
        let subs = self.subscribers.lock().unwrap();
        for (id, sub) in subs.iter() {
            if sub.tx.try_send(msg.clone()).is_err() {
                debug!("queue full for subscriber {id}, dropping message");
            }
        }
        Ok(())
    }

    /// Broadcast EOS to every subscriber and mark the bus closed.
    pub fn close(&self) {
        if self.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        debug!("closing FanoutBus");
        let subs = self.subscribers.lock().unwrap();
        for sub in subs.values() {
            let _ = sub.tx.try_send(None);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_ordering_is_publish_order() {
        let bus: FanoutBus<i32> = FanoutBus::new();
        let mut sub = bus.subscribe("a", 8);
        bus.publish(Some(1)).unwrap();
        bus.publish(Some(2)).unwrap();
        bus.publish(Some(3)).unwrap();
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, Some(2));
        assert_eq!(sub.recv().await, Some(3));
    }

    #[tokio::test]
    async fn publish_none_signals_eos() {
        let bus: FanoutBus<i32> = FanoutBus::new();
        let mut sub = bus.subscribe("a", 8);
        bus.publish(Some(1)).unwrap();
        bus.publish(None).unwrap();
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_every_message() {
        let bus: FanoutBus<i32> = FanoutBus::new();
        let mut a = bus.subscribe("a", 8);
        let mut b = bus.subscribe("b", 8);
        bus.publish(Some(42)).unwrap();
        assert_eq!(a.recv().await, Some(42));
        assert_eq!(b.recv().await, Some(42));
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_subscriber_only_without_blocking() {
        let bus: FanoutBus<i32> = FanoutBus::new();
        let mut slow = bus.subscribe("slow", 1);
        let mut fast = bus.subscribe("fast", 8);
        bus.publish(Some(1)).unwrap();
        // slow's queue (capacity 1) is now full; this publish must not block.
        bus.publish(Some(2)).unwrap();
        assert_eq!(fast.recv().await, Some(1));
        assert_eq!(fast.recv().await, Some(2));
        assert_eq!(slow.recv().await, Some(1));
    }

    #[tokio::test]
    async fn close_broadcasts_eos_and_rejects_publish() {
        let bus: FanoutBus<i32> = FanoutBus::new();
        let mut sub = bus.subscribe("a", 8);
        bus.close();
        assert!(bus.publish(Some(1)).is_err());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn resubscribing_same_id_returns_existing_queue() {
        let bus: FanoutBus<i32> = FanoutBus::new();
        let mut first = bus.subscribe("a", 8);
        bus.publish(Some(1)).unwrap();
        let mut second = bus.subscribe("a", 8);
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(Some(2)).unwrap();
        // Both handles race on the same underlying queue; every published
        // message is observed exactly once across the two of them.
        assert_eq!(first.recv().await, Some(1));
        assert_eq!(second.recv().await, Some(2));
    }

    #[tokio::test]
    async fn unsubscribe_places_sentinel() {
        let bus: FanoutBus<i32> = FanoutBus::new();
        let mut sub = bus.subscribe("a", 8);
        bus.unsubscribe("a");
        assert_eq!(sub.recv().await, None);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
