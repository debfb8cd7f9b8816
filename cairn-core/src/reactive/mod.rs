//! Reactive Plumbing
//!
//! Shared bookkeeping used by every other module: listener registration
//! and the per-thread tracking context that records dependencies while a
//! derived node computes.
//!
//! # Concepts
//!
//! ## Subscriptions
//!
//! Cells, cache entries, and graph nodes notify listeners when they
//! change. A listener is a plain callback; it carries no payload and is
//! expected to re-read the value it cares about. Registering returns a
//! [`Subscription`] which unsubscribes when dropped.
//!
//! ## Tracking
//!
//! While a derived node computes, every node it reads is recorded in a
//! thread-local frame along with the version that was observed. The graph
//! uses those recorded versions to decide whether a cached result is
//! still valid.

mod context;
mod subscriber;

pub use context::{Dependencies, TrackingContext};
pub use subscriber::{Listener, SubscriberId, Subscription};

pub(crate) use subscriber::ListenerMap;
