//! Fetch Cache
//!
//! A table from resource key to the [`AsyncCell`](crate::cell::AsyncCell)
//! holding that resource. The cache owns async settlement: it calls the
//! injected [`Fetcher`], deduplicates concurrent requests for the same
//! key, applies optimistic mutations, and tells subscribers when an entry
//! changes.
//!
//! # Concepts
//!
//! ## Entries
//!
//! An entry is the current cell for a key plus a version. Versions only
//! grow; a cell installed later always carries a higher version than any
//! cell it replaced.
//!
//! ## Revalidation
//!
//! `revalidate` throws the current cell away regardless of its state and
//! fetches again. A fetch that was in flight at that moment still runs to
//! completion, but its result only lands in the discarded cell.
//!
//! ## Staleness
//!
//! A [`StalenessPolicy`] decides whether a settled entry may be served by
//! `get`. The default keeps entries until they are explicitly replaced.

mod fetcher;
mod policy;
mod store;

pub use fetcher::Fetcher;
pub use policy::{EntryInfo, MaxAge, NeverStale, StalenessPolicy};
pub use store::Cache;
