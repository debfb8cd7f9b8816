//! Graph Nodes
//!
//! Identity, kind, and dirty-state types shared by source and derived
//! nodes, plus the traits the graph uses to read nodes without knowing
//! their value types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::StateGraph;
use crate::error::ReadError;

/// Unique identifier for a node in the state graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node #{}", self.0)
    }
}

/// The kind of node in the state graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A directly settable value. Sources are the roots of the graph.
    Source,

    /// A memoized function of other nodes.
    Derived,
}

/// Dirty state of a derived node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The cached result is up to date.
    Clean,

    /// Something upstream changed. The recorded dependency versions decide
    /// on the next read whether the node actually recomputes.
    MaybeDirty,

    /// Never computed.
    Dirty,
}

/// A node whose value can be read as `T`.
///
/// Implemented by [`Source`](super::Source) and
/// [`Derived`](super::Derived); read through [`StateGraph::read`] or a
/// [`Reader`](super::Reader).
pub trait GraphNode<T>: Send + Sync {
    fn id(&self) -> NodeId;

    fn label(&self) -> &str;

    /// Bring the node up to date and return its outcome and version.
    #[doc(hidden)]
    fn pull(&self, graph: &StateGraph) -> (Result<T, ReadError>, u64);
}

/// Type-erased view the graph keeps of every registered node.
pub(crate) trait AnyNode: Send + Sync {
    fn id(&self) -> NodeId;

    fn kind(&self) -> NodeKind;

    fn label(&self) -> &str;

    /// Bring the node up to date and return its version.
    fn refresh(&self, graph: &StateGraph) -> u64;

    /// Something upstream changed.
    fn mark_maybe_dirty(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id2.raw() > id1.raw());
    }

    #[test]
    fn node_id_display() {
        let id = NodeId::new();
        assert_eq!(id.to_string(), format!("node #{}", id.raw()));
    }
}
