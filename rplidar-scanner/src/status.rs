//! Topic based publish/subscribe for status events.
//!
//! Publishing never blocks: every subscriber owns a bounded queue, and when
//! it is full the oldest queued event makes room for the new one. A slow
//! subscriber therefore skips intermediate events but always sees the latest,
//! including the one that ends a session. The last event of each topic is
//! kept and handed to whoever subscribes later.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Weak};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Subscriber<E> {
    tx: Sender<E>,
    /// Second handle on the queue, used to evict the oldest event.
    queue: Receiver<E>,
    alive: Weak<()>,
}

struct Topic<E> {
    subscribers: Vec<Subscriber<E>>,
    last: Option<E>,
}

impl<E> Default for Topic<E> {
    fn default() -> Self {
        Topic {
            subscribers: Vec::new(),
            last: None,
        }
    }
}

/// Receiving end of one subscription. Dropping it unsubscribes; once the
/// topic is removed the queue drains and then reports disconnection.
pub struct Subscription<E> {
    rx: Receiver<E>,
    _alive: Arc<()>,
}

impl<E> Deref for Subscription<E> {
    type Target = Receiver<E>;

    fn deref(&self) -> &Receiver<E> {
        &self.rx
    }
}

impl<E> IntoIterator for Subscription<E> {
    type Item = E;
    type IntoIter = SubscriptionIter<E>;

    fn into_iter(self) -> SubscriptionIter<E> {
        SubscriptionIter(self)
    }
}

impl<'a, E> IntoIterator for &'a Subscription<E> {
    type Item = E;
    type IntoIter = crossbeam_channel::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.iter()
    }
}

/// Blocking iterator over an owned subscription.
pub struct SubscriptionIter<E>(Subscription<E>);

impl<E> Iterator for SubscriptionIter<E> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        self.0.rx.recv().ok()
    }
}

pub struct StatusChannel<E> {
    topics: Arc<Mutex<HashMap<String, Topic<E>>>>,
    capacity: usize,
}

impl<E> Clone for StatusChannel<E> {
    fn clone(&self) -> Self {
        StatusChannel {
            topics: Arc::clone(&self.topics),
            capacity: self.capacity,
        }
    }
}

impl<E: Clone + Send> Default for StatusChannel<E> {
    fn default() -> Self {
        StatusChannel::new()
    }
}

impl<E: Clone + Send> StatusChannel<E> {
    pub fn new() -> StatusChannel<E> {
        StatusChannel::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// `capacity` events may queue up per subscriber before the oldest are
    /// evicted.
    pub fn with_capacity(capacity: usize) -> StatusChannel<E> {
        StatusChannel {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn publish(&self, topic: &str, event: E) {
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_default();
        entry
            .subscribers
            .retain(|subscriber| subscriber.alive.strong_count() > 0);
        for subscriber in &entry.subscribers {
            if let Err(TrySendError::Full(event)) = subscriber.tx.try_send(event.clone()) {
                trace!("Subscriber queue on {} is full, oldest event evicted", topic);
                let _ = subscriber.queue.try_recv();
                // only the publisher holding the lock sends, so there is room now
                let _ = subscriber.tx.try_send(event);
            }
        }
        entry.last = Some(event);
    }

    /// Live events of `topic`, starting with its most recent event if any.
    pub fn subscribe(&self, topic: &str) -> Subscription<E> {
        let (tx, rx) = bounded(self.capacity);
        let alive = Arc::new(());
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.to_string()).or_default();
        if let Some(last) = &entry.last {
            // the queue is empty, so this cannot fail
            let _ = tx.try_send(last.clone());
        }
        entry.subscribers.push(Subscriber {
            tx,
            queue: rx.clone(),
            alive: Arc::downgrade(&alive),
        });
        Subscription { rx, _alive: alive }
    }

    pub fn last(&self, topic: &str) -> Option<E> {
        self.topics
            .lock()
            .get(topic)
            .and_then(|entry| entry.last.clone())
    }

    /// Forgets the cached last event of `topic` if `stale` says so.
    pub fn clear_last_if<F: FnOnce(&E) -> bool>(&self, topic: &str, stale: F) {
        if let Some(entry) = self.topics.lock().get_mut(topic) {
            if entry.last.as_ref().is_some_and(stale) {
                entry.last = None;
            }
        }
    }

    /// Drops a topic with its cached event. Its subscribers receive what is
    /// still queued and then see the channel disconnect.
    pub fn remove(&self, topic: &str) {
        self.topics.lock().remove(topic);
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, |entry| {
            entry
                .subscribers
                .iter()
                .filter(|subscriber| subscriber.alive.strong_count() > 0)
                .count()
        })
    }
}
