//! Subscriber types for the reactive system.
//!
//! Cells, cache entries, and graph nodes all expose the same listener
//! surface: register a callback, get back a [`Subscription`], drop it to
//! stop listening.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;

/// Unique identifier for a subscriber.
///
/// Each registered listener gets a unique ID so it can be removed again
/// without comparing closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A change callback. Listeners carry no payload; they re-read whatever
/// they are interested in.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Insertion-ordered listener registry.
///
/// Listeners fire in the order they subscribed. The registry lock is
/// released before any callback runs, so a listener may subscribe,
/// unsubscribe, or trigger further notifications.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Mutex<IndexMap<SubscriberId, Listener>>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, listener: Listener) -> SubscriberId {
        let id = SubscriberId::new();
        self.listeners.lock().insert(id, listener);
        id
    }

    pub(crate) fn remove(&self, id: SubscriberId) -> bool {
        self.listeners.lock().shift_remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Invoke every listener registered at the time of the call. Returns
    /// how many ran.
    pub(crate) fn notify(&self) -> usize {
        let snapshot: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for listener in &snapshot {
            listener();
        }
        snapshot.len()
    }
}

/// One [`ListenerSet`] per key.
///
/// A set is created by the first subscription to its key and removed with
/// the last one, so keys nobody listens to cost nothing.
pub(crate) struct ListenerMap<K>
where
    K: Eq + Hash,
{
    sets: DashMap<K, Arc<ListenerSet>>,
}

impl<K> ListenerMap<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            sets: DashMap::new(),
        }
    }

    /// Register `listener` under `key` and return a guard that removes it
    /// again.
    pub(crate) fn subscribe(self: &Arc<Self>, key: K, listener: Listener) -> Subscription {
        // Inserted under the shard lock, so a concurrent prune of the same
        // key cannot drop the set out from under the new listener.
        let id = self
            .sets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ListenerSet::new()))
            .insert(listener);

        let map: Weak<Self> = Arc::downgrade(self);
        Subscription::new(id, move || {
            if let Some(map) = map.upgrade() {
                map.unsubscribe(&key, id);
            }
        })
    }

    fn unsubscribe(&self, key: &K, id: SubscriberId) {
        self.sets.remove_if(key, |_, set| {
            set.remove(id);
            set.is_empty()
        });
    }

    /// Notify every listener under `key`. Returns how many ran.
    pub(crate) fn notify(&self, key: &K) -> usize {
        let set = self.sets.get(key).map(|set| Arc::clone(set.value()));
        set.map_or(0, |set| set.notify())
    }

    pub(crate) fn len(&self, key: &K) -> usize {
        self.sets.get(key).map_or(0, |set| set.len())
    }

    /// Number of keys with at least one listener.
    pub(crate) fn key_count(&self) -> usize {
        self.sets.len()
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle unsubscribes. Call [`Subscription::detach`] to keep
/// the listener registered for as long as its target lives.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    id: SubscriberId,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriberId, cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// The ID of the registered listener.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the listener registered without holding the handle.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    fn counting(calls: &Arc<AtomicUsize>) -> Listener {
        let calls = calls.clone();
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn listeners_fire_in_subscription_order() {
        let map = Arc::new(ListenerMap::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let order = order.clone();
            map.subscribe("k", Arc::new(move || order.lock().push(1)))
        };
        let second = {
            let order = order.clone();
            map.subscribe("k", Arc::new(move || order.lock().push(2)))
        };

        assert_eq!(map.notify(&"k"), 2);
        assert_eq!(*order.lock(), vec![1, 2]);

        drop(first);
        drop(second);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let map = Arc::new(ListenerMap::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let subscription = map.subscribe(1u32, counting(&calls));
        map.notify(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(subscription);
        assert_eq!(map.notify(&1), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(&1), 0);
    }

    #[test]
    fn last_unsubscribe_removes_the_key() {
        let map = Arc::new(ListenerMap::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = map.subscribe("a", counting(&calls));
        let b = map.subscribe("a", counting(&calls));
        let c = map.subscribe("c", counting(&calls));
        assert_eq!(map.key_count(), 2);

        drop(a);
        assert_eq!(map.key_count(), 2);
        assert_eq!(map.len(&"a"), 1);

        drop(b);
        drop(c);
        assert_eq!(map.key_count(), 0);

        // A later subscription recreates the set.
        let _again = map.subscribe("a", counting(&calls));
        assert_eq!(map.notify(&"a"), 1);
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let map = Arc::new(ListenerMap::new());
        let calls = Arc::new(AtomicUsize::new(0));

        map.subscribe("k", counting(&calls)).detach();

        map.notify(&"k");
        map.notify(&"k");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(map.key_count(), 1);
    }
}
