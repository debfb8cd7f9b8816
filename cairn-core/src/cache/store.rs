//! Key-addressed fetch cache.
//!
//! # Deduplication
//!
//! `get` installs a pending [`AsyncCell`] under the map's per-key entry
//! lock, so for a given key every caller between the first fetch starting
//! and that fetch settling receives the same cell. The fetcher and the
//! staleness policy are only ever called with no map lock held, so either
//! may read the cache.
//!
//! # Versions
//!
//! Every installed cell is tagged with a version drawn from a cache-wide
//! counter. When a cell settles, its settlement is only announced if the
//! entry still carries the same version; a fetch that was superseded by
//! `revalidate` or `mutate` settles into a cell nobody references and is
//! otherwise dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::fetcher::Fetcher;
use super::policy::{EntryInfo, NeverStale, StalenessPolicy};
use crate::cell::AsyncCell;
use crate::config::CacheConfig;
use crate::reactive::{Listener, ListenerMap, Subscription};

#[derive(Clone)]
struct Entry<T> {
    cell: AsyncCell<T>,
    version: u64,
    stored_at: Instant,
}

struct CacheInner<T> {
    fetcher: Box<dyn Fetcher<T>>,
    policy: Box<dyn StalenessPolicy>,
    entries: DashMap<String, Entry<T>>,
    listeners: Arc<ListenerMap<String>>,
    versions: AtomicU64,
}

/// Shared handle to a key → [`AsyncCell`] table.
///
/// Clones share the same table.
pub struct Cache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Cache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A cache whose entries never go stale on their own.
    pub fn new<F>(fetcher: F) -> Self
    where
        F: Fetcher<T>,
    {
        Self::with_policy(fetcher, NeverStale)
    }

    pub fn with_config<F>(fetcher: F, config: &CacheConfig) -> Self
    where
        F: Fetcher<T>,
    {
        Self::build(Box::new(fetcher), config.staleness_policy())
    }

    pub fn with_policy<F, P>(fetcher: F, policy: P) -> Self
    where
        F: Fetcher<T>,
        P: StalenessPolicy,
    {
        Self::build(Box::new(fetcher), Box::new(policy))
    }

    fn build(fetcher: Box<dyn Fetcher<T>>, policy: Box<dyn StalenessPolicy>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                policy,
                entries: DashMap::new(),
                listeners: Arc::new(ListenerMap::new()),
                versions: AtomicU64::new(0),
            }),
        }
    }

    /// Current cell for `key`, fetching if there is none or it is stale.
    ///
    /// Must be called within a tokio runtime when a fetch is needed.
    pub fn get(&self, key: &str) -> AsyncCell<T> {
        // The staleness policy runs without any map lock held.
        let seen = self.inner.entries.get(key).map(|entry| entry.value().clone());
        if let Some(entry) = &seen {
            if !self.is_stale(key, entry) {
                trace!(key, version = entry.version, "cache hit");
                return entry.cell.clone();
            }
        }
        let seen = seen.map(|entry| entry.version);

        // Only a pending cell is installed under the entry lock. That is
        // enough for every later caller to share it; the fetcher is called
        // once the lock is released.
        let (cell, version, replaced) = match self.inner.entries.entry(key.to_owned()) {
            MapEntry::Occupied(occupied) if Some(occupied.get().version) != seen => {
                trace!(key, version = occupied.get().version, "entry replaced concurrently");
                return occupied.get().cell.clone();
            }
            MapEntry::Occupied(mut occupied) => {
                let entry = self.pending_entry();
                let installed = (entry.cell.clone(), entry.version, true);
                occupied.insert(entry);
                installed
            }
            MapEntry::Vacant(vacant) => {
                let entry = self.pending_entry();
                let installed = (entry.cell.clone(), entry.version, false);
                vacant.insert(entry);
                installed
            }
        };

        self.start_fetch(key, version, &cell);
        if replaced {
            self.notify(key);
        }
        cell
    }

    /// Optimistically replace the value under `key`.
    ///
    /// `updater` receives the current resolved value, or `None` if the
    /// entry is absent, pending, or failed. The result is stored as a
    /// resolved cell without contacting the fetcher.
    ///
    /// `updater` runs without any lock held. If the entry is replaced
    /// while it runs, it is called again with the newer value, so
    /// concurrent mutations never overwrite each other.
    pub fn mutate<F>(&self, key: &str, mut updater: F) -> AsyncCell<T>
    where
        F: FnMut(Option<&T>) -> T,
    {
        loop {
            let (seen, previous) = match self.inner.entries.get(key) {
                Some(entry) => (Some(entry.version), entry.cell.peek().into_value()),
                None => (None, None),
            };
            let cell = AsyncCell::resolved(updater(previous.as_ref()));

            let version = match self.inner.entries.entry(key.to_owned()) {
                MapEntry::Occupied(mut occupied) if Some(occupied.get().version) == seen => {
                    let entry = self.entry_for(cell.clone());
                    let version = entry.version;
                    occupied.insert(entry);
                    Some(version)
                }
                MapEntry::Vacant(vacant) if seen.is_none() => {
                    let entry = self.entry_for(cell.clone());
                    let version = entry.version;
                    vacant.insert(entry);
                    Some(version)
                }
                _ => None,
            };

            match version {
                Some(version) => {
                    debug!(key, version, "cache entry mutated");
                    self.notify(key);
                    return cell;
                }
                None => trace!(key, "entry changed during mutate, retrying"),
            }
        }
    }

    /// Discard whatever is stored under `key` and fetch again.
    pub fn revalidate(&self, key: &str) -> AsyncCell<T> {
        let (cell, version, superseded) = match self.inner.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = self.pending_entry();
                let (cell, version) = (entry.cell.clone(), entry.version);
                let previous = occupied.insert(entry);
                (cell, version, Some(previous.version))
            }
            MapEntry::Vacant(vacant) => {
                let entry = self.pending_entry();
                let installed = (entry.cell.clone(), entry.version, None);
                vacant.insert(entry);
                installed
            }
        };

        debug!(key, version, ?superseded, "cache entry revalidated");
        self.start_fetch(key, version, &cell);
        self.notify(key);
        cell
    }

    /// Revalidate every stored key matching `predicate`. Returns how many
    /// keys were revalidated.
    pub fn invalidate_all<P>(&self, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for key in &keys {
            self.revalidate(key);
        }
        keys.len()
    }

    /// Current cell for `key` without fetching.
    pub fn peek(&self, key: &str) -> Option<AsyncCell<T>> {
        self.inner.entries.get(key).map(|entry| entry.cell.clone())
    }

    /// Version of the entry currently stored under `key`.
    pub fn version(&self, key: &str) -> Option<u64> {
        self.inner.entries.get(key).map(|entry| entry.version)
    }

    /// Drop the entry for `key`. Subscribers are notified.
    pub fn evict(&self, key: &str) -> bool {
        let removed = self.inner.entries.remove(key).is_some();
        if removed {
            debug!(key, "cache entry evicted");
            self.notify(key);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Listen for changes to `key`: mutation, replacement, eviction, and
    /// settlement of the current cell.
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .subscribe(key.to_owned(), Arc::new(listener) as Listener)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.listeners.len(&key.to_owned())
    }

    /// Number of keys with at least one subscriber.
    pub fn subscribed_keys(&self) -> usize {
        self.inner.listeners.key_count()
    }

    pub(crate) fn downgrade(&self) -> WeakCache<T> {
        WeakCache(Arc::downgrade(&self.inner))
    }

    fn next_version(&self) -> u64 {
        self.inner.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A fresh entry for `cell`. Call with the entry lock held so that
    /// versions are installed in the order they are drawn.
    fn entry_for(&self, cell: AsyncCell<T>) -> Entry<T> {
        Entry {
            cell,
            version: self.next_version(),
            stored_at: Instant::now(),
        }
    }

    fn pending_entry(&self) -> Entry<T> {
        self.entry_for(AsyncCell::pending())
    }

    /// Call the fetcher and settle `cell` with its outcome.
    fn start_fetch(&self, key: &str, version: u64, cell: &AsyncCell<T>) {
        debug!(key, version, "starting fetch");
        self.watch_settlement(key, version, cell);
        cell.drive(self.inner.fetcher.fetch(key));
    }

    fn is_stale(&self, key: &str, entry: &Entry<T>) -> bool {
        if !entry.cell.is_settled() {
            return false;
        }
        self.inner.policy.is_stale(&EntryInfo {
            key,
            version: entry.version,
            age: entry.stored_at.elapsed(),
        })
    }

    /// Announce the cell's settlement if it is still the current one.
    fn watch_settlement(&self, key: &str, version: u64, cell: &AsyncCell<T>) {
        let cache: Weak<CacheInner<T>> = Arc::downgrade(&self.inner);
        let key = key.to_owned();
        cell.on_settle(move || {
            if let Some(inner) = cache.upgrade() {
                Cache { inner }.on_settled(&key, version);
            }
        });
    }

    fn on_settled(&self, key: &str, version: u64) {
        let current = self.version(key);
        if current == Some(version) {
            trace!(key, version, "fetch settled");
            self.notify(key);
        } else {
            warn!(key, version, ?current, "discarding late settlement");
        }
    }

    fn notify(&self, key: &str) {
        let notified = self.inner.listeners.notify(&key.to_owned());
        trace!(key, listeners = notified, "notified cache subscribers");
    }
}

/// Non-owning handle, for listeners registered on the cache itself.
pub(crate) struct WeakCache<T>(Weak<CacheInner<T>>);

impl<T> WeakCache<T> {
    pub(crate) fn upgrade(&self) -> Option<Cache<T>> {
        self.0.upgrade().map(|inner| Cache { inner })
    }
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.inner.entries.len())
            .field("versions", &self.inner.versions.load(Ordering::Relaxed))
            .finish()
    }
}
