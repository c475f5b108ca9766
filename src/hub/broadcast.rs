//! Event broadcast hub
//!
//! Observers subscribe a handler to one of three topics and receive the full
//! current collection for that topic on every change (snapshot delivery, not
//! deltas). Handlers run synchronously on the publishing task while the
//! subscriber list is read-locked; unsubscribing takes the write lock, so once
//! `unsubscribe` returns the handler will never be invoked again.
//!
//! Snapshots built through [`BroadcastHub::publish_latest`] and the initial
//! snapshot of [`BroadcastHub::subscribe_with_current`] are built and delivered
//! one at a time, so every subscriber ends up holding the newest collection.

use crate::records::{AlertView, Reading, Sensor};
use log::{debug, error};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Observable record collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Sensors,
    Readings,
    Alerts,
}

/// Full current collection for one topic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", content = "items", rename_all = "lowercase")]
pub enum Snapshot {
    Sensors(Vec<Sensor>),
    /// Latest reading of every sensor
    Readings(Vec<Reading>),
    Alerts(Vec<AlertView>),
}

impl Snapshot {
    pub fn topic(&self) -> Topic {
        match self {
            Snapshot::Sensors(_) => Topic::Sensors,
            Snapshot::Readings(_) => Topic::Readings,
            Snapshot::Alerts(_) => Topic::Alerts,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Snapshot::Sensors(items) => items.len(),
            Snapshot::Readings(items) => items.len(),
            Snapshot::Alerts(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Observer callback
///
/// Handlers must not subscribe, unsubscribe or publish from inside the
/// callback; the subscriber list is read-locked while they run.
pub type Handler = Arc<dyn Fn(&Snapshot) + Send + Sync>;

type SubscriberTable = HashMap<Topic, Vec<(u64, Handler)>>;

#[derive(Default)]
struct HubInner {
    subscribers: RwLock<SubscriberTable>,
    next_id: AtomicU64,
    /// Held while a snapshot is built and delivered
    sequence: Mutex<()>,
}

impl HubInner {
    fn remove(&self, topic: Topic, id: u64) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        match subscribers.get_mut(&topic) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(existing, _)| *existing != id);
                before != handlers.len()
            }
            None => false,
        }
    }
}

/// In-process publish/subscribe hub
///
/// Cloning the hub shares the same subscriber list.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

/// Handle returned by [`BroadcastHub::subscribe`]
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to stop deliveries.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    topic: Topic,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Stop deliveries to this subscription's handler
    ///
    /// Blocks until any in-flight publish on the hub has finished, so no
    /// delivery happens after this returns. Returns `false` if the handler was
    /// already removed or the hub no longer exists.
    pub fn unsubscribe(self) -> bool {
        match self.hub.upgrade() {
            Some(hub) => {
                let removed = hub.remove(self.topic, self.id);
                if removed {
                    debug!("Unsubscribed handler {} from {:?}", self.id, self.topic);
                }
                removed
            }
            None => false,
        }
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));

        debug!("Subscribed handler {} to {:?}", id, topic);
        Subscription {
            id,
            topic,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Register `handler` for `topic` and immediately hand it the snapshot
    /// returned by `current`
    ///
    /// Registration, building the initial snapshot and delivering it happen
    /// while no [`publish_latest`](Self::publish_latest) call is in progress,
    /// so the handler never receives a collection older than one it has
    /// already seen.
    ///
    /// # Arguments
    ///
    /// * `topic` - Topic to observe
    /// * `current` - Builds the current collection of `topic`
    /// * `handler` - Callback for the initial and every later snapshot
    pub fn subscribe_with_current<S, F>(&self, topic: Topic, current: S, handler: F) -> Subscription
    where
        S: FnOnce() -> Snapshot,
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let _sequence = self.inner.sequence.lock().unwrap_or_else(|e| e.into_inner());

        let handler = Arc::new(handler);
        let registered = Arc::clone(&handler);
        let subscription = self.subscribe(topic, move |snapshot| registered(snapshot));

        let current = current();
        if current.topic() != topic {
            error!(
                "Initial snapshot for subscriber {} is {:?}, expected {:?}",
                subscription.id,
                current.topic(),
                topic
            );
        } else if panic::catch_unwind(AssertUnwindSafe(|| handler(&current))).is_err() {
            error!(
                "Subscriber {} panicked while handling initial {:?} snapshot",
                subscription.id, subscription.topic
            );
        }
        subscription
    }

    /// Build a snapshot with `build` and deliver it
    ///
    /// Calls are serialized with each other and with
    /// [`subscribe_with_current`](Self::subscribe_with_current), so snapshots
    /// reach each handler in the order they were built.
    ///
    /// # Returns
    ///
    /// The number of successful deliveries.
    pub fn publish_latest<S>(&self, build: S) -> usize
    where
        S: FnOnce() -> Snapshot,
    {
        let _sequence = self.inner.sequence.lock().unwrap_or_else(|e| e.into_inner());
        self.publish(build())
    }

    /// Deliver `snapshot` to every handler of its topic
    ///
    /// A panicking handler is logged and skipped; the remaining handlers still
    /// receive the snapshot. Returns the number of successful deliveries.
    pub fn publish(&self, snapshot: Snapshot) -> usize {
        let topic = snapshot.topic();
        let subscribers = self.inner.subscribers.read().unwrap_or_else(|e| e.into_inner());
        let handlers = match subscribers.get(&topic) {
            Some(handlers) => handlers,
            None => return 0,
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&snapshot))) {
                Ok(()) => delivered += 1,
                Err(_) => error!("Subscriber {} panicked while handling {:?} snapshot", id, topic),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&topic)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("sensors", &self.subscriber_count(Topic::Sensors))
            .field("readings", &self.subscriber_count(Topic::Readings))
            .field("alerts", &self.subscriber_count(Topic::Alerts))
            .finish()
    }
}
