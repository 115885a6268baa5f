//! Change event fan-out: every table mutation is published once to a
//! bounded global queue; a pump task drains it in batches of up to 64 and
//! republishes each batch to every subscriber's own bounded queue. Every
//! queue in this module drops its oldest entry on overflow rather than
//! blocking the writer — there is no tokio primitive with that policy, so
//! both the global and per-subscriber queues are a small hand-rolled
//! `VecDeque` + `Notify` pair.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;

/// What changed about a key. `Renamed` carries the key's previous name so
/// subscribers can update any local index they keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
    Renamed { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
    pub bucket_id: u32,
    pub kind: ChangeKind,
}

struct QueueInner {
    queue: VecDeque<ChangeEvent>,
    capacity: usize,
    closed: bool,
}

/// The write half of a drop-oldest queue. Cloneable; every clone pushes
/// into the same underlying buffer.
#[derive(Clone)]
pub struct DropOldestSender {
    inner: Arc<Mutex<QueueInner>>,
    notify: Arc<Notify>,
}

impl DropOldestSender {
    /// Pushes `event`, evicting the oldest queued event first if the
    /// queue is already at capacity.
    pub fn push(&self, event: ChangeEvent) {
        {
            let mut guard = self.inner.lock().unwrap();
            if guard.queue.len() >= guard.capacity {
                guard.queue.pop_front();
            }
            guard.queue.push_back(event);
        }
        self.notify.notify_one();
    }

    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mints another receive half over this same underlying queue, so a
    /// reconnecting listener resumes whatever is already buffered instead
    /// of starting from an empty queue.
    fn new_receiver(&self) -> DropOldestReceiver {
        DropOldestReceiver {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
        }
    }
}

pub struct DropOldestReceiver {
    inner: Arc<Mutex<QueueInner>>,
    notify: Arc<Notify>,
}

impl DropOldestReceiver {
    /// Waits for the next event, or returns `None` once the sender side
    /// has closed and the queue has drained.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            {
                let mut guard = self.inner.lock().unwrap();
                if let Some(event) = guard.queue.pop_front() {
                    return Some(event);
                }
                if guard.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking drain of one queued event, used to fill a batch.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.inner.lock().unwrap().queue.pop_front()
    }
}

pub fn drop_oldest_channel(capacity: usize) -> (DropOldestSender, DropOldestReceiver) {
    let inner = Arc::new(Mutex::new(QueueInner {
        queue: VecDeque::new(),
        capacity,
        closed: false,
    }));
    let notify = Arc::new(Notify::new());
    (
        DropOldestSender {
            inner: inner.clone(),
            notify: notify.clone(),
        },
        DropOldestReceiver { inner, notify },
    )
}

struct SubscriberEntry {
    sender: DropOldestSender,
    /// Count of sessions currently holding a receive half of this queue.
    /// `Unsubscribe` only decrements this; the entry itself is reaped by
    /// `purge_unused` once it reaches zero, so a peer that reconnects with
    /// the same key before the next purge resumes the same queue rather
    /// than losing whatever was buffered for it.
    listeners: AtomicU64,
}

/// The cluster-wide fan-out: one bounded inbound queue fed by table
/// mutations, and a set of bounded outbound queues, one per subscriber.
pub struct ChangeEventFanOut {
    global: DropOldestSender,
    subscribers: DashMap<String, SubscriberEntry>,
    next_anon_id: AtomicU64,
    max_queue_depth: usize,
}

impl ChangeEventFanOut {
    /// `global_capacity` bounds the inbound queue (~10,000 by default);
    /// `max_queue_depth` bounds each subscriber's outbound queue.
    pub fn new(global_capacity: usize, max_queue_depth: usize) -> (Arc<Self>, DropOldestReceiver) {
        let (global, global_rx) = drop_oldest_channel(global_capacity);
        (
            Arc::new(Self {
                global,
                subscribers: DashMap::new(),
                next_anon_id: AtomicU64::new(0),
                max_queue_depth,
            }),
            global_rx,
        )
    }

    /// Publishes a single change event onto the global queue. Called by
    /// table operations as they mutate a bucket.
    pub fn publish(&self, event: ChangeEvent) {
        self.global.push(event);
    }

    /// `Subscribe(key?) -> (key, listener)`. `key` is a stable identity the
    /// caller controls (e.g. a peer's own node id); a reconnect with the
    /// same key before `purge_unused` next runs resumes the existing queue,
    /// including anything published while it was disconnected. A caller
    /// with no stable identity (an ordinary client) passes `None` and gets
    /// a fresh queue under a generated key, returned so it can `Unsubscribe`
    /// later.
    pub fn subscribe(&self, key: Option<String>) -> (String, DropOldestReceiver) {
        let key = key.unwrap_or_else(|| {
            format!("anon-{}", self.next_anon_id.fetch_add(1, Ordering::SeqCst))
        });

        if let Some(entry) = self.subscribers.get(&key) {
            entry.listeners.fetch_add(1, Ordering::SeqCst);
            return (key, entry.sender.new_receiver());
        }

        let (sender, receiver) = drop_oldest_channel(self.max_queue_depth);
        self.subscribers.insert(
            key.clone(),
            SubscriberEntry {
                sender,
                listeners: AtomicU64::new(1),
            },
        );
        (key, receiver)
    }

    /// `Unsubscribe(listener)`. Decrements the listener count only — the
    /// queue (and anything still buffered in it) survives until
    /// `purge_unused` reaps a zero-count entry.
    pub fn unsubscribe(&self, key: &str) {
        if let Some(entry) = self.subscribers.get(key) {
            entry
                .listeners
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
                .ok();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Reaps subscribers whose listener count has fallen to zero. Intended
    /// to run on a periodic timer (`queue_purge_interval_sec`); this is the
    /// only place an entry is actually removed, which is what lets a
    /// reconnecting peer resume a queue instead of racing its own
    /// disconnect-driven `Unsubscribe`.
    pub fn purge_unused(&self) {
        self.subscribers
            .retain(|_, entry| entry.listeners.load(Ordering::SeqCst) > 0);
    }

    /// `PublishMultiple(events)`: fans a batch out to every live
    /// subscriber's queue.
    fn publish_multiple(&self, events: &[ChangeEvent]) {
        for entry in self.subscribers.iter() {
            for event in events {
                entry.value().sender.push(event.clone());
            }
        }
    }

    /// Drains the global queue in batches of up to 64 events and fans
    /// each batch out. Runs for the node's lifetime; exits once the
    /// global sender side is closed (shutdown).
    pub async fn run_pump(self: Arc<Self>, mut global_rx: DropOldestReceiver) {
        loop {
            let first = match global_rx.recv().await {
                Some(event) => event,
                None => return,
            };
            let mut batch = Vec::with_capacity(64);
            batch.push(first);
            while batch.len() < 64 {
                match global_rx.try_recv() {
                    Some(event) => batch.push(event),
                    None => break,
                }
            }
            self.publish_multiple(&batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(key: &str) -> ChangeEvent {
        ChangeEvent {
            key: key.to_string(),
            bucket_id: 0,
            kind: ChangeKind::Added,
        }
    }

    #[test]
    fn drop_oldest_sender_evicts_on_overflow() {
        let (tx, mut rx) = drop_oldest_channel(2);
        tx.push(event("a"));
        tx.push(event("b"));
        tx.push(event("c"));

        assert_eq!(rx.try_recv().unwrap().key, "b");
        assert_eq!(rx.try_recv().unwrap().key, "c");
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn receiver_wakes_on_push() {
        let (tx, mut rx) = drop_oldest_channel(10);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.push(event("evt10000"));
        });
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "evt10000");
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_changes_count() {
        let (fanout, _global_rx) = ChangeEventFanOut::new(10, 10);
        assert_eq!(fanout.subscriber_count(), 0);

        let (key, _rx) = fanout.subscribe(None);
        assert_eq!(fanout.subscriber_count(), 1);

        // Unsubscribe only decrements; the entry survives until purged.
        fanout.unsubscribe(&key);
        assert_eq!(fanout.subscriber_count(), 1);

        fanout.purge_unused();
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn purge_unused_reaps_zero_listener_entries_only() {
        let (fanout, _global_rx) = ChangeEventFanOut::new(10, 10);
        let (key, _rx) = fanout.subscribe(None);
        assert_eq!(fanout.subscriber_count(), 1);

        // Dropping the receiver without unsubscribing must not be enough
        // to reap the entry -- only an explicit Unsubscribe (or a second
        // listener that never arrives) brings the count to zero.
        fanout.purge_unused();
        assert_eq!(fanout.subscriber_count(), 1);

        fanout.unsubscribe(&key);
        fanout.purge_unused();
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn reconnect_with_same_key_resumes_buffered_events() {
        let (fanout, _global_rx) = ChangeEventFanOut::new(10, 10);
        let (key, rx_a) = fanout.subscribe(Some("peer-a".to_string()));

        fanout.publish_multiple(&[event("evt10000")]);
        drop(rx_a);
        fanout.unsubscribe(&key);

        // Reconnect before a purge runs: same key, same queue, the event
        // published while disconnected is still there.
        let (key_again, mut rx_b) = fanout.subscribe(Some("peer-a".to_string()));
        assert_eq!(key_again, key);
        assert_eq!(rx_b.try_recv().unwrap().key, "evt10000");
    }

    #[tokio::test]
    async fn pump_fans_global_events_out_to_every_subscriber() {
        let (fanout, global_rx) = ChangeEventFanOut::new(100, 100);
        let (_key_a, mut rx_a) = fanout.subscribe(None);
        let (_key_b, mut rx_b) = fanout.subscribe(None);

        let pump = tokio::spawn(fanout.clone().run_pump(global_rx));

        fanout.publish(event("evt10000"));

        let got_a = tokio::time::timeout(Duration::from_secs(1), rx_a.recv())
            .await
            .unwrap()
            .unwrap();
        let got_b = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got_a.key, "evt10000");
        assert_eq!(got_b.key, "evt10000");

        pump.abort();
    }
}
