//! Derived nodes.
//!
//! A derived node caches the outcome of its computation together with the
//! version of every upstream node it read.
//!
//! # How Derived Nodes Update
//!
//! 1. The node starts `Dirty`; the first read computes it.
//!
//! 2. When something upstream changes, the graph marks it `MaybeDirty`.
//!    Nothing is recomputed yet.
//!
//! 3. On the next read, each recorded upstream is brought up to date and
//!    its version compared with the recorded one. If none moved, the node
//!    is marked clean and the cached outcome is served.
//!
//! 4. Otherwise the computation runs again. If it produces a value equal
//!    to the previous one, the node keeps its version, so its own
//!    dependents will find nothing changed.
//!
//! Asynchronous derivations store an [`AsyncCell`]. When that cell
//! settles, the node's version moves and its dependents are invalidated,
//! unless the node has since recomputed and installed a newer cell.
//!
//! A read that suspends on a derived node completes when the awaited cell
//! settles or when the node is next invalidated, whichever comes first.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use super::node::{AnyNode, DirtyState, GraphNode, NodeId, NodeKind};
use super::{Reader, StateGraph};
use crate::cell::{AsyncCell, CellId, Suspension};
use crate::error::{panic_message, LoadError, ReadError};
use crate::reactive::{Dependencies, TrackingContext};

pub(crate) type SyncCompute<T> = dyn Fn(&Reader<'_>) -> Result<T, ReadError> + Send + Sync;

type Operation<T> = BoxFuture<'static, Result<T, LoadError>>;

pub(crate) type AsyncCompute<T> =
    dyn Fn(&Reader<'_>) -> Result<Operation<T>, ReadError> + Send + Sync;

pub(crate) enum Compute<T> {
    Sync(Box<SyncCompute<T>>),
    Async(Box<AsyncCompute<T>>),
}

#[derive(Clone)]
enum Outcome<T> {
    Value(T),
    Loading(AsyncCell<T>),
    Error(ReadError),
}

impl<T> Outcome<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn read(&self) -> Result<T, ReadError> {
        match self {
            Outcome::Value(value) => Ok(value.clone()),
            Outcome::Loading(cell) => cell.read(),
            Outcome::Error(err) => Err(err.clone()),
        }
    }

    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Outcome::Value(a), Outcome::Value(b)) => a == b,
            (Outcome::Loading(a), Outcome::Loading(b)) => a.ptr_eq(b),
            (Outcome::Error(ReadError::Failed(a)), Outcome::Error(ReadError::Failed(b))) => a == b,
            _ => false,
        }
    }
}

struct DerivedSlot<T> {
    dirty: DirtyState,
    version: u64,
    /// Incremented by every invalidation, so a computation can tell
    /// whether it raced with one.
    marks: u64,
    dependencies: Dependencies,
    outcome: Option<Outcome<T>>,
}

pub(crate) struct DerivedInner<T> {
    id: NodeId,
    label: String,
    compute: Compute<T>,
    slot: Mutex<DerivedSlot<T>>,
    /// Publishes the mark count on every invalidation.
    invalidated: watch::Sender<u64>,
    this: Weak<DerivedInner<T>>,
}

impl<T> DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Bring the cached outcome up to date and return the node version.
    fn ensure_fresh(&self, graph: &StateGraph) -> u64 {
        let (dirty, marks, dependencies) = {
            let slot = self.slot.lock();
            if slot.dirty == DirtyState::Clean {
                return slot.version;
            }
            (slot.dirty, slot.marks, slot.dependencies.clone())
        };

        if dirty == DirtyState::MaybeDirty && !graph.dependencies_changed(&dependencies) {
            let mut slot = self.slot.lock();
            if slot.marks == marks {
                slot.dirty = DirtyState::Clean;
            }
            trace!(node = %self.label, version = slot.version, "dependencies unchanged");
            return slot.version;
        }

        self.recompute(graph, marks)
    }

    fn recompute(&self, graph: &StateGraph, marks: u64) -> u64 {
        debug!(node = %self.label, "recomputing derived node");

        let (outcome, dependencies) = {
            let _frame = TrackingContext::enter(self.id);
            let reader = Reader::new(graph);
            let outcome = self.run(&reader);
            (outcome, TrackingContext::take_dependencies())
        };

        let upstream: Vec<NodeId> = dependencies.iter().map(|(id, _)| *id).collect();
        let (version, loading) = {
            let mut slot = self.slot.lock();
            let changed = !slot
                .outcome
                .as_ref()
                .is_some_and(|previous| previous.same_as(&outcome));
            if changed {
                slot.version += 1;
            }
            slot.dependencies = dependencies;
            slot.dirty = if slot.marks == marks {
                DirtyState::Clean
            } else {
                DirtyState::MaybeDirty
            };
            let loading = match &outcome {
                Outcome::Loading(cell) => Some(cell.clone()),
                _ => None,
            };
            slot.outcome = Some(outcome);
            (slot.version, loading)
        };

        graph.record_dependencies(self.id, upstream);
        if let Some(cell) = loading {
            self.watch(graph, &cell);
        }
        version
    }

    fn run(&self, reader: &Reader<'_>) -> Outcome<T> {
        let result = match &self.compute {
            Compute::Sync(compute) => {
                catch_unwind(AssertUnwindSafe(|| compute(reader).map(Outcome::Value)))
            }
            Compute::Async(compute) => catch_unwind(AssertUnwindSafe(|| {
                compute(reader).map(|operation| {
                    let label = self.label.clone();
                    let operation = operation
                        .map(move |result| result.map_err(|err| err.attributed_to(&label)));
                    Outcome::Loading(AsyncCell::spawn(operation))
                })
            })),
        };

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(ReadError::Failed(err))) => {
                Outcome::Error(ReadError::Failed(err.attributed_to(&self.label)))
            }
            Ok(Err(suspended)) => Outcome::Error(suspended),
            Err(payload) => Outcome::Error(ReadError::Failed(LoadError::Derivation {
                node: self.label.clone(),
                message: panic_message(payload),
            })),
        }
    }

    /// Invalidate dependents once `cell` settles, if it is still current.
    fn watch(&self, graph: &StateGraph, cell: &AsyncCell<T>) {
        let node = self.this.clone();
        let graph = graph.downgrade();
        let cell_id = cell.id();
        cell.on_settle(move || {
            let (Some(node), Some(graph)) = (node.upgrade(), graph.upgrade()) else {
                return;
            };
            if node.settled(cell_id) {
                graph.propagate(node.id);
            }
        });
    }

    fn settled(&self, cell: CellId) -> bool {
        let mut slot = self.slot.lock();
        match &slot.outcome {
            Some(Outcome::Loading(current)) if current.id() == cell => {
                slot.version += 1;
                trace!(node = %self.label, version = slot.version, "async derivation settled");
                true
            }
            _ => false,
        }
    }
}

impl<T> AnyNode for DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Derived
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn refresh(&self, graph: &StateGraph) -> u64 {
        self.ensure_fresh(graph)
    }

    fn mark_maybe_dirty(&self) {
        let mut slot = self.slot.lock();
        slot.marks += 1;
        if slot.dirty == DirtyState::Clean {
            slot.dirty = DirtyState::MaybeDirty;
        }
        self.invalidated.send_replace(slot.marks);
    }
}

/// Handle to a memoized node computed from other nodes.
///
/// Create with [`StateGraph::define_derived`],
/// [`StateGraph::define_derived_async`], or through a
/// [`Family`](super::Family). Clones refer to the same node.
pub struct Derived<T> {
    pub(crate) inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(label: String, compute: Compute<T>) -> Self {
        let (invalidated, _rx) = watch::channel(0);
        let inner = Arc::new_cyclic(|this| DerivedInner {
            id: NodeId::new(),
            label,
            compute,
            slot: Mutex::new(DerivedSlot {
                dirty: DirtyState::Dirty,
                version: 0,
                marks: 0,
                dependencies: Dependencies::new(),
                outcome: None,
            }),
            invalidated,
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.inner.slot.lock().dirty
    }

    /// Current version. Moves whenever the cached outcome changes.
    pub fn version(&self) -> u64 {
        self.inner.slot.lock().version
    }

    /// Whether both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> GraphNode<T> for Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.inner.id
    }

    fn label(&self) -> &str {
        &self.inner.label
    }

    fn pull(&self, graph: &StateGraph) -> (Result<T, ReadError>, u64) {
        self.inner.ensure_fresh(graph);
        let slot = self.inner.slot.lock();
        let result = match &slot.outcome {
            Some(outcome) => outcome.read(),
            None => Err(ReadError::Failed(LoadError::Derivation {
                node: self.inner.label.clone(),
                message: "node has not been computed".to_string(),
            })),
        };
        let result = result.map_err(|err| match err {
            // Invalidated since the refresh above: read again straight away.
            ReadError::Suspended(_) if slot.dirty != DirtyState::Clean => {
                ReadError::Suspended(Suspension::ready(self.inner.label.as_str()))
            }
            ReadError::Suspended(pending) => ReadError::Suspended(pending.or(
                Suspension::until_changed(
                    self.inner.label.as_str(),
                    self.inner.invalidated.subscribe(),
                ),
            )),
            other => other,
        });
        (result, slot.version)
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("dirty", &slot.dirty)
            .field("version", &slot.version)
            .field("dependencies", &slot.dependencies.len())
            .finish()
    }
}
