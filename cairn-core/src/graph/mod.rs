//! State Graph
//!
//! A dependency graph of named nodes. Sources hold values set from
//! outside; derived nodes are memoized functions of other nodes.
//!
//! # Overview
//!
//! - Nodes are created through a [`StateGraph`] and read through it
//! - Edges are discovered: a derived node depends on whatever it read
//!   during its last computation
//! - An edge from B to A means A read B
//!
//! When a source changes, everything downstream is marked maybe-dirty and
//! its subscribers are notified. Values are recomputed lazily on the next
//! read, and only if an upstream version actually moved.
//!
//! Pending values propagate as [`ReadError::Suspended`](crate::error::ReadError)
//! and failures as [`ReadError::Failed`](crate::error::ReadError), so a
//! derivation that reads with `?` passes both along untouched.

mod derived;
mod family;
mod node;
mod source;
mod state_graph;
mod topology;

pub use derived::Derived;
pub use family::Family;
pub use node::{DirtyState, GraphNode, NodeId, NodeKind};
pub use source::Source;
pub use state_graph::{Reader, StateGraph};
pub use topology::Topology;
