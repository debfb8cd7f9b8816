//! Tracking Context
//!
//! The tracking context records which derived node is currently computing
//! and which upstream nodes it reads. Every read made while a frame is
//! active is recorded together with the version that was observed, which
//! is what memoization later compares against.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a derivation pushes a
//! frame; the returned guard pops it. Nested derivations (a derived node
//! reading another derived node that must recompute first) push their own
//! frames, so each computation only sees its own dependencies.
//!
//! The stack doubles as the cycle detector: a node that is already on the
//! stack is being read by one of its own dependencies.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::graph::NodeId;

/// Upstream reads recorded by one computation: node and observed version.
pub type Dependencies = SmallVec<[(NodeId, u64); 4]>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
struct Frame {
    node: NodeId,
    dependencies: Dependencies,
}

/// Guard that pops the frame when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct TrackingContext {
    node: NodeId,
}

impl TrackingContext {
    /// Enter a new frame for the given node.
    pub fn enter(node: NodeId) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                node,
                dependencies: Dependencies::new(),
            });
        });

        Self { node }
    }

    /// Check if any computation is currently tracking reads.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The node whose computation is running, if any.
    pub fn current_node() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|frame| frame.node))
    }

    /// Whether `node` is computing somewhere up the stack.
    pub fn is_computing(node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().any(|frame| frame.node == node))
    }

    /// Nodes on the stack from the outermost computation inwards.
    pub fn stack() -> Vec<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().map(|frame| frame.node).collect())
    }

    /// Record a read of `node` at `version` in the innermost frame.
    ///
    /// Repeated reads of the same node keep the first observed version.
    pub fn track(node: NodeId, version: u64) {
        CONTEXT_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                if !frame.dependencies.iter().any(|(id, _)| *id == node) {
                    frame.dependencies.push((node, version));
                }
            }
        });
    }

    /// Take the reads recorded so far in the innermost frame.
    pub fn take_dependencies() -> Dependencies {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|frame| std::mem::take(&mut frame.dependencies))
                .unwrap_or_default()
        })
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.node, self.node,
                    "TrackingContext mismatch: expected {:?}, got {:?}",
                    self.node, frame.node
                );
            }
        });
    }
}
