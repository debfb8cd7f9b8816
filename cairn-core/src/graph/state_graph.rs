//! The state graph.
//!
//! Owns node registration, the dependency topology, change propagation,
//! and per-node subscriptions. Typed state lives in the node handles; the
//! graph keeps a type-erased view of every node so it can refresh and
//! invalidate them by ID.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::derived::Compute;
use super::node::{AnyNode, GraphNode, NodeId, NodeKind};
use super::topology::Topology;
use super::{Derived, Family, Source};
use crate::cache::Cache;
use crate::cell::AsyncCell;
use crate::error::{LoadError, ReadError};
use crate::reactive::{Dependencies, Listener, ListenerMap, Subscription, TrackingContext};

pub(crate) struct GraphInner {
    nodes: DashMap<NodeId, Arc<dyn AnyNode>>,
    topology: RwLock<Topology>,
    listeners: Arc<ListenerMap<NodeId>>,
    /// Cache subscriptions feeding cache-backed sources, by source.
    bindings: DashMap<NodeId, Subscription>,
}

/// Shared handle to a graph of source and derived nodes.
///
/// Clones share the same graph.
#[derive(Clone)]
pub struct StateGraph {
    inner: Arc<GraphInner>,
}

#[derive(Clone)]
pub(crate) struct WeakGraph(Weak<GraphInner>);

impl WeakGraph {
    pub(crate) fn upgrade(&self) -> Option<StateGraph> {
        self.0.upgrade().map(|inner| StateGraph { inner })
    }
}

/// The read capability handed to derivations.
///
/// Every node read through a `Reader` becomes a dependency of the node
/// being computed.
pub struct Reader<'g> {
    graph: &'g StateGraph,
}

impl<'g> Reader<'g> {
    pub(crate) fn new(graph: &'g StateGraph) -> Self {
        Self { graph }
    }

    pub fn get<T, N>(&self, node: &N) -> Result<T, ReadError>
    where
        N: GraphNode<T> + ?Sized,
    {
        self.graph.read(node)
    }

    pub fn graph(&self) -> &StateGraph {
        self.graph
    }
}

impl StateGraph {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GraphInner {
                nodes: DashMap::new(),
                topology: RwLock::new(Topology::new()),
                listeners: Arc::new(ListenerMap::new()),
                bindings: DashMap::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakGraph {
        WeakGraph(Arc::downgrade(&self.inner))
    }

    fn register(&self, node: Arc<dyn AnyNode>) {
        let id = node.id();
        self.inner.topology.write().add_node(id, node.kind());
        trace!(node = node.label(), id = id.raw(), "node registered");
        self.inner.nodes.insert(id, node);
    }

    fn node(&self, id: NodeId) -> Option<Arc<dyn AnyNode>> {
        self.inner.nodes.get(&id).map(|node| Arc::clone(node.value()))
    }

    /// A directly settable node. `None` means "not yet populated": reads
    /// suspend until the first `set`.
    pub fn define_source<T>(&self, label: impl Into<String>, initial: Option<T>) -> Source<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let source = Source::new(label.into(), initial);
        self.register(source.inner.clone());
        source
    }

    /// A source whose value follows the cache entry for `key`.
    ///
    /// Starts the fetch if the entry is missing. Whenever the entry is
    /// replaced, mutated, or evicted, the source follows; an evicted entry
    /// leaves the source unpopulated. The source keeps following the cache
    /// until [`StateGraph::release_cache_source`] is called.
    pub fn define_cache_source<T>(
        &self,
        label: impl Into<String>,
        cache: &Cache<T>,
        key: &str,
    ) -> Source<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let source = self.define_source(label, None);

        let graph = self.downgrade();
        let target = source.clone();
        let entries = cache.downgrade();
        let entry_key = key.to_owned();
        let subscription = cache.subscribe(key, move || {
            let (Some(graph), Some(entries)) = (graph.upgrade(), entries.upgrade()) else {
                return;
            };
            match entries.peek(&entry_key) {
                Some(cell) => graph.set_cell(&target, cell),
                None => graph.clear(&target),
            }
        });
        self.inner.bindings.insert(source.id(), subscription);

        self.set_cell(&source, cache.get(key));
        source
    }

    /// Stop a cache-backed source from following its cache entry. The
    /// source keeps whatever it currently holds.
    ///
    /// Returns `false` if `source` was not created by
    /// [`StateGraph::define_cache_source`] or was already released.
    pub fn release_cache_source<T>(&self, source: &Source<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let released = self.inner.bindings.remove(&source.id()).is_some();
        if released {
            debug!(node = source.label(), "cache source released");
        }
        released
    }

    /// A memoized synchronous derivation.
    pub fn define_derived<T, F>(&self, label: impl Into<String>, compute: F) -> Derived<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&Reader<'_>) -> Result<T, ReadError> + Send + Sync + 'static,
    {
        let node = Derived::new(label.into(), Compute::Sync(Box::new(compute)));
        self.register(node.inner.clone());
        node
    }

    /// A memoized asynchronous derivation.
    ///
    /// `compute` reads its dependencies synchronously through the
    /// [`Reader`] and returns the future that produces the value. The
    /// future runs on the ambient tokio runtime; until it settles, reads
    /// of the node suspend.
    pub fn define_derived_async<T, F, Fut>(
        &self,
        label: impl Into<String>,
        compute: F,
    ) -> Derived<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&Reader<'_>) -> Result<Fut, ReadError> + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LoadError>> + Send + 'static,
    {
        let node = Derived::new(
            label.into(),
            Compute::Async(Box::new(move |reader: &Reader<'_>| {
                compute(reader).map(|operation| operation.boxed())
            })),
        );
        self.register(node.inner.clone());
        node
    }

    /// One synchronous derived node per distinct parameter.
    pub fn define_family<P, T, F>(&self, label: impl Into<String>, compute: F) -> Family<P, T>
    where
        P: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&P, &Reader<'_>) -> Result<T, ReadError> + Send + Sync + 'static,
    {
        let compute = Arc::new(compute);
        Family::new(self.clone(), label.into(), move |graph, label, param: P| {
            let compute = Arc::clone(&compute);
            graph.define_derived(label, move |reader| compute(&param, reader))
        })
    }

    /// One asynchronous derived node per distinct parameter.
    pub fn define_family_async<P, T, F, Fut>(
        &self,
        label: impl Into<String>,
        compute: F,
    ) -> Family<P, T>
    where
        P: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&P, &Reader<'_>) -> Result<Fut, ReadError> + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LoadError>> + Send + 'static,
    {
        let compute = Arc::new(compute);
        Family::new(self.clone(), label.into(), move |graph, label, param: P| {
            let compute = Arc::clone(&compute);
            graph.define_derived_async(label, move |reader| compute(&param, reader))
        })
    }

    /// Blocking read.
    ///
    /// Returns the node's value, the failure it (or an upstream) is in, or
    /// a suspension if it (or an upstream) is still pending. Inside a
    /// derivation the read is recorded as a dependency.
    pub fn read<T, N>(&self, node: &N) -> Result<T, ReadError>
    where
        N: GraphNode<T> + ?Sized,
    {
        let id = node.id();
        if TrackingContext::is_computing(id) {
            let path = self.cycle_path(id);
            warn!(node = node.label(), ?path, "dependency cycle detected");
            return Err(ReadError::Failed(LoadError::Cycle { path }));
        }

        let (result, version) = node.pull(self);
        TrackingContext::track(id, version);
        result
    }

    /// Replace a source's value and invalidate everything downstream.
    pub fn set<T>(&self, source: &Source<T>, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.install(source, Some(AsyncCell::resolved(value)));
    }

    /// Set a source from its current resolved value.
    ///
    /// `updater` receives `None` if the source is unpopulated, pending, or
    /// failed.
    pub fn update<T, F>(&self, source: &Source<T>, updater: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> T,
    {
        let current = source.peek();
        self.set(source, updater(current.as_ref()));
    }

    /// Back a source with an asynchronous cell. Reads suspend until the
    /// cell settles, then see its value or error.
    pub fn set_cell<T>(&self, source: &Source<T>, cell: AsyncCell<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.install(source, Some(cell));
    }

    /// Return a source to "not yet populated".
    pub fn clear<T>(&self, source: &Source<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.install(source, None);
    }

    fn install<T>(&self, source: &Source<T>, cell: Option<AsyncCell<T>>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let Some(version) = source.inner.install(cell.clone()) else {
            return;
        };
        debug!(node = source.label(), version, "source updated");
        self.propagate(source.id());
        source.inner.announce(version);

        if let Some(cell) = cell.filter(|cell| !cell.is_settled()) {
            let graph = self.downgrade();
            let target = Arc::downgrade(&source.inner);
            let cell_id = cell.id();
            cell.on_settle(move || {
                let (Some(graph), Some(target)) = (graph.upgrade(), target.upgrade()) else {
                    return;
                };
                if let Some(version) = target.bump_if_current(cell_id) {
                    graph.propagate(target.id());
                    target.announce(version);
                }
            });
        }
    }

    /// Listen for changes to `node` or anything upstream of it.
    pub fn subscribe<T, N, F>(&self, node: &N, listener: F) -> Subscription
    where
        N: GraphNode<T> + ?Sized,
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .subscribe(node.id(), Arc::new(listener) as Listener)
    }

    /// Nodes `id` read during its last computation.
    pub fn dependencies_of(&self, id: NodeId) -> Vec<NodeId> {
        self.inner.topology.read().dependencies(id)
    }

    /// Nodes that read `id` during their last computation.
    pub fn dependents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.inner.topology.read().dependents(id)
    }

    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.inner.topology.read().kind(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.topology.read().contains(id)
    }

    pub fn node_count(&self) -> usize {
        self.inner.topology.read().node_count()
    }

    /// Whether any recorded upstream has moved past the recorded version.
    pub(crate) fn dependencies_changed(&self, dependencies: &Dependencies) -> bool {
        dependencies.iter().any(|(id, seen)| match self.node(*id) {
            Some(node) => node.refresh(self) != *seen,
            None => true,
        })
    }

    pub(crate) fn record_dependencies(&self, node: NodeId, upstream: Vec<NodeId>) {
        trace!(node = node.raw(), dependencies = upstream.len(), "recording dependencies");
        self.inner.topology.write().set_dependencies(node, upstream);
    }

    /// Mark everything downstream of `changed` maybe-dirty, then notify
    /// subscribers of `changed` and of each downstream node, upstream first.
    pub(crate) fn propagate(&self, changed: NodeId) {
        let affected = self.inner.topology.read().affected_by(changed);
        for id in &affected {
            if let Some(node) = self.node(*id) {
                node.mark_maybe_dirty();
            }
        }

        debug!(node = changed.raw(), affected = affected.len(), "propagating change");
        self.notify(changed);
        for id in affected {
            self.notify(id);
        }
    }

    fn notify(&self, id: NodeId) {
        self.inner.listeners.notify(&id);
    }

    fn cycle_path(&self, id: NodeId) -> Vec<String> {
        let stack = TrackingContext::stack();
        let start = stack.iter().position(|frame| *frame == id).unwrap_or(0);
        stack[start..]
            .iter()
            .chain(std::iter::once(&id))
            .map(|frame| match self.node(*frame) {
                Some(node) => node.label().to_string(),
                None => frame.to_string(),
            })
            .collect()
    }
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGraph")
            .field("nodes", &self.inner.nodes.len())
            .field("bindings", &self.inner.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_invalidates_transitive_dependents() {
        let graph = StateGraph::new();
        let base = graph.define_source("base", Some(5));
        let base_clone = base.clone();
        let doubled = graph.define_derived("doubled", move |r| Ok(r.get(&base_clone)? * 2));
        let doubled_clone = doubled.clone();
        let plus_ten = graph.define_derived("plusTen", move |r| Ok(r.get(&doubled_clone)? + 10));

        assert_eq!(graph.read(&plus_ten).unwrap(), 20);
        assert_eq!(graph.dependencies_of(plus_ten.id()), vec![doubled.id()]);
        assert_eq!(graph.dependents_of(base.id()), vec![doubled.id()]);

        graph.set(&base, 10);
        assert_eq!(graph.read(&plus_ten).unwrap(), 30);
    }

    #[test]
    fn absent_source_suspends_dependents() {
        let graph = StateGraph::new();
        let base: Source<u32> = graph.define_source("base", None);
        let base_clone = base.clone();
        let doubled = graph.define_derived("doubled", move |r| Ok(r.get(&base_clone)? * 2));

        assert!(graph.read(&doubled).unwrap_err().is_suspended());

        graph.set(&base, 4);
        assert_eq!(graph.read(&doubled).unwrap(), 8);

        graph.clear(&base);
        assert!(graph.read(&doubled).unwrap_err().is_suspended());
    }

    #[test]
    fn update_sees_current_value() {
        let graph = StateGraph::new();
        let list = graph.define_source("list", None::<Vec<u32>>);

        graph.update(&list, |old| {
            assert!(old.is_none());
            vec![1]
        });
        graph.update(&list, |old| {
            let mut next = old.cloned().unwrap_or_default();
            next.push(2);
            next
        });
        assert_eq!(graph.read(&list).unwrap(), vec![1, 2]);
    }

    #[test]
    fn subscribers_hear_upstream_changes_in_order() {
        let graph = StateGraph::new();
        let base = graph.define_source("base", Some(1));
        let base_clone = base.clone();
        let derived = graph.define_derived("derived", move |r| r.get(&base_clone));
        graph.read(&derived).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let _base_sub = {
            let order = order.clone();
            graph.subscribe(&base, move || order.lock().push("base"))
        };
        let _derived_sub = {
            let order = order.clone();
            graph.subscribe(&derived, move || order.lock().push("derived"))
        };

        graph.set(&base, 2);
        assert_eq!(*order.lock(), vec!["base", "derived"]);
    }

    #[test]
    fn dropped_subscriptions_leave_no_listener_sets() {
        let graph = StateGraph::new();
        let nodes: Vec<_> = (0..20)
            .map(|i| graph.define_source(format!("n{i}"), Some(i)))
            .collect();

        let subscriptions: Vec<_> = nodes
            .iter()
            .map(|node| graph.subscribe(node, || {}))
            .collect();
        assert_eq!(graph.inner.listeners.key_count(), 20);

        drop(subscriptions);
        assert_eq!(graph.inner.listeners.key_count(), 0);
    }

    #[test]
    fn set_does_not_recompute_eagerly() {
        let graph = StateGraph::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let base = graph.define_source("base", Some(1));
        let base_clone = base.clone();
        let derived = graph.define_derived("derived", move |r| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            r.get(&base_clone)
        });

        graph.read(&derived).unwrap();
        graph.set(&base, 2);
        graph.set(&base, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(graph.read(&derived).unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cycles_fail_instead_of_deadlocking() {
        let graph = StateGraph::new();
        let slot: Arc<Mutex<Option<Derived<u32>>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();

        let selfish = graph.define_derived("selfish", move |r| {
            let me = slot_clone.lock().clone();
            match me {
                Some(me) => r.get(&me),
                None => Ok(0),
            }
        });
        *slot.lock() = Some(selfish.clone());

        match graph.read(&selfish).unwrap_err().as_failure() {
            Some(LoadError::Cycle { path }) => {
                assert_eq!(path, &vec!["selfish".to_string(), "selfish".to_string()]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn graph_tracks_registered_nodes() {
        let graph = StateGraph::new();
        let source = graph.define_source("a", Some(1u8));
        let source_clone = source.clone();
        let derived = graph.define_derived("b", move |r| r.get(&source_clone));

        assert_eq!(graph.node_count(), 2);
        assert!(graph.contains(source.id()));
        assert_eq!(graph.node_kind(source.id()), Some(NodeKind::Source));
        assert_eq!(graph.node_kind(derived.id()), Some(NodeKind::Derived));
    }
}
