//! Consumer Bridge
//!
//! Adapts graph reads to the two shapes a rendering layer consumes:
//!
//! - **Blocking**: the host waits until the value is ready or fails.
//!   [`Bridge::read_blocking`] awaits suspensions and retries;
//!   [`Bridge::read_suspending`] hands the raw [`ReadError`] back for hosts
//!   that drive suspension themselves.
//! - **Non-blocking**: [`Bridge::read_non_blocking`] always returns at once
//!   with a tagged [`Loadable`].
//!
//! Both forms go through [`StateGraph::read`], so a node reports the same
//! state whichever form is used.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cell::Suspension;
use crate::error::{LoadError, ReadError};
use crate::graph::{GraphNode, StateGraph};
use crate::reactive::Subscription;

/// Tag of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Loading,
    Ready,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Status::Loading => "loading",
            Status::Ready => "ready",
            Status::Error => "error",
        };
        f.write_str(tag)
    }
}

/// Snapshot of a node for hosts that render every state themselves.
#[derive(Debug, Clone)]
pub enum Loadable<T> {
    /// Not ready. The suspension completes when it is worth reading again.
    Loading(Suspension),
    Ready(T),
    Error(LoadError),
}

impl<T> Loadable<T> {
    pub fn status(&self) -> Status {
        match self {
            Loadable::Loading(_) => Status::Loading,
            Loadable::Ready(_) => Status::Ready,
            Loadable::Error(_) => Status::Error,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Loadable::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Loadable::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LoadError> {
        match self {
            Loadable::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Loadable::Loading(_))
    }

    pub fn map<U, F>(self, f: F) -> Loadable<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Loadable::Loading(suspension) => Loadable::Loading(suspension),
            Loadable::Ready(value) => Loadable::Ready(f(value)),
            Loadable::Error(err) => Loadable::Error(err),
        }
    }
}

impl<T> From<Result<T, ReadError>> for Loadable<T> {
    fn from(result: Result<T, ReadError>) -> Self {
        match result {
            Ok(value) => Loadable::Ready(value),
            Err(ReadError::Suspended(suspension)) => Loadable::Loading(suspension),
            Err(ReadError::Failed(err)) => Loadable::Error(err),
        }
    }
}

/// Read access to a [`StateGraph`] for an external rendering layer.
#[derive(Debug, Clone)]
pub struct Bridge {
    graph: StateGraph,
}

impl Bridge {
    pub fn new(graph: StateGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    /// One blocking-read attempt. A pending node comes back as
    /// [`ReadError::Suspended`]; the caller awaits it and calls again.
    pub fn read_suspending<T, N>(&self, node: &N) -> Result<T, ReadError>
    where
        N: GraphNode<T> + ?Sized,
    {
        self.graph.read(node)
    }

    /// Wait until `node` resolves or fails.
    pub async fn read_blocking<T, N>(&self, node: &N) -> Result<T, LoadError>
    where
        N: GraphNode<T> + ?Sized,
    {
        loop {
            match self.graph.read(node) {
                Ok(value) => return Ok(value),
                Err(ReadError::Failed(err)) => return Err(err),
                Err(ReadError::Suspended(suspension)) => {
                    trace!(node = node.label(), origin = suspension.origin(), "waiting");
                    suspension.wait().await;
                }
            }
        }
    }

    /// Current state of `node`. Never suspends.
    pub fn read_non_blocking<T, N>(&self, node: &N) -> Loadable<T>
    where
        N: GraphNode<T> + ?Sized,
    {
        self.graph.read(node).into()
    }

    /// Listen for changes to `node` or anything upstream of it.
    pub fn subscribe<T, N, F>(&self, node: &N, listener: F) -> Subscription
    where
        N: GraphNode<T> + ?Sized,
        F: Fn() + Send + Sync + 'static,
    {
        self.graph.subscribe(node, listener)
    }
}
