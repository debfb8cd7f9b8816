//! Cairn Core
//!
//! This crate provides a small reactive runtime for asynchronously loaded
//! state. It implements:
//!
//! - Async cells: the tri-state outcome of one asynchronous operation
//! - A key-addressed fetch cache with in-flight deduplication
//! - A state graph of sources and memoized derived nodes
//! - A bridge exposing graph reads to a rendering layer
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `cell`: `AsyncCell` and the `Suspension` handed out by pending reads
//! - `cache`: `Cache`, the injected `Fetcher`, and staleness policies
//! - `graph`: `StateGraph`, its node handles, and the dependency topology
//! - `bridge`: blocking and non-blocking reads for consumers
//! - `reactive`: subscriptions and dependency tracking shared by the above
//! - `error` / `config`: error types and cache configuration
//!
//! The cache owns asynchronous settlement; the graph owns derivation and
//! dependency tracking. A node backed by a cache entry is an ordinary
//! source whose value is driven by cache notifications.
//!
//! # Example
//!
//! ```rust,ignore
//! use cairn_core::{Bridge, Cache, FetchError, StateGraph};
//!
//! let cache = Cache::new(|key: String| async move {
//!     load_from_network(&key).await.map_err(|e| FetchError::new(e.to_string()))
//! });
//!
//! let graph = StateGraph::new();
//! let mountains = graph.define_cache_source("mountains", &cache, "/api/mountains");
//!
//! let asian = graph.define_family("byContinent", move |continent: &String, read| {
//!     let all: Vec<Mountain> = read.get(&mountains)?;
//!     Ok(all.into_iter().filter(|m| &m.continent == continent).collect::<Vec<_>>())
//! });
//!
//! // Suspends until the fetch settles, then returns the filtered list.
//! let bridge = Bridge::new(graph);
//! let list = bridge.read_blocking(&asian.get("Asia".into())).await?;
//! ```

pub mod bridge;
pub mod cache;
pub mod cell;
pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use bridge::{Bridge, Loadable, Status};
pub use cache::{Cache, Fetcher, MaxAge, NeverStale, StalenessPolicy};
pub use cell::{AsyncCell, CellState, Suspension};
pub use config::CacheConfig;
pub use error::{ConfigError, FetchError, LoadError, ReadError};
pub use graph::{Derived, Family, GraphNode, Reader, Source, StateGraph};
pub use reactive::Subscription;
