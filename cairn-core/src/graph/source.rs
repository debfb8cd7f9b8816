//! Source nodes.
//!
//! A source holds its value as an optional [`AsyncCell`]: absent means
//! "not yet populated" and reads suspend until the source is set; a
//! pending cell suspends until that cell settles or the source changes,
//! whichever happens first. Plain values are stored as resolved cells.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::node::{AnyNode, GraphNode, NodeId, NodeKind};
use super::StateGraph;
use crate::cell::{AsyncCell, CellId, CellState, Suspension};
use crate::error::ReadError;

struct SourceSlot<T> {
    cell: Option<AsyncCell<T>>,
    version: u64,
}

pub(crate) struct SourceInner<T> {
    id: NodeId,
    label: String,
    slot: Mutex<SourceSlot<T>>,
    /// Publishes the version after each change has been propagated.
    announced: watch::Sender<u64>,
}

impl<T> SourceInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(label: String, initial: Option<T>) -> Self {
        let (announced, _rx) = watch::channel(0);
        Self {
            id: NodeId::new(),
            label,
            slot: Mutex::new(SourceSlot {
                cell: initial.map(AsyncCell::resolved),
                version: 0,
            }),
            announced,
        }
    }

    /// Replace the stored cell. Returns the new version, or `None` if
    /// `cell` is already the stored one.
    pub(crate) fn install(&self, cell: Option<AsyncCell<T>>) -> Option<u64> {
        let mut slot = self.slot.lock();
        let same = match (&slot.cell, &cell) {
            (Some(current), Some(next)) => current.ptr_eq(next),
            _ => false,
        };
        if same {
            return None;
        }
        slot.cell = cell;
        slot.version += 1;
        Some(slot.version)
    }

    /// Bump the version if `cell` is still the stored one.
    pub(crate) fn bump_if_current(&self, cell: CellId) -> Option<u64> {
        let mut slot = self.slot.lock();
        match &slot.cell {
            Some(current) if current.id() == cell => {
                slot.version += 1;
                Some(slot.version)
            }
            _ => None,
        }
    }

    /// Wake readers that suspended on an absent value.
    pub(crate) fn announce(&self, version: u64) {
        self.announced.send_replace(version);
    }

    fn current_value(&self) -> Option<T> {
        self.slot
            .lock()
            .cell
            .as_ref()
            .and_then(|cell| cell.peek().into_value())
    }
}

impl<T> AnyNode for SourceInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn refresh(&self, _graph: &StateGraph) -> u64 {
        self.slot.lock().version
    }

    fn mark_maybe_dirty(&self) {}
}

/// Handle to a directly settable node.
///
/// Create with [`StateGraph::define_source`]; update with
/// [`StateGraph::set`]. Clones refer to the same node.
pub struct Source<T> {
    pub(crate) inner: Arc<SourceInner<T>>,
}

impl<T> Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(label: String, initial: Option<T>) -> Self {
        Self {
            inner: Arc::new(SourceInner::new(label, initial)),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The resolved value, if any, without reading through the graph.
    pub fn peek(&self) -> Option<T> {
        self.inner.current_value()
    }

    /// The stored cell, if the source has been populated.
    pub fn cell(&self) -> Option<AsyncCell<T>> {
        self.inner.slot.lock().cell.clone()
    }
}

impl<T> GraphNode<T> for Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.inner.id
    }

    fn label(&self) -> &str {
        &self.inner.label
    }

    fn pull(&self, _graph: &StateGraph) -> (Result<T, ReadError>, u64) {
        // Subscribing under the slot lock means no change can slip between
        // the read and the subscription.
        let slot = self.inner.slot.lock();
        let changed = || {
            Suspension::until_changed(self.inner.label.as_str(), self.inner.announced.subscribe())
        };
        let result = match &slot.cell {
            Some(cell) => cell.read().map_err(|err| match err {
                ReadError::Suspended(settled) => ReadError::Suspended(settled.or(changed())),
                other => other,
            }),
            None => Err(ReadError::Suspended(changed())),
        };
        (result, slot.version)
    }
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Source<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        let state = slot.cell.as_ref().map(AsyncCell::peek);
        f.debug_struct("Source")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("version", &slot.version)
            .field("state", &state.unwrap_or(CellState::Pending))
            .finish()
    }
}
