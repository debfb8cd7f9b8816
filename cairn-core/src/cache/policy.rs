//! Staleness policies.
//!
//! A policy decides, on `get`, whether a settled entry may be served or
//! must be refetched. Pending entries are never handed to the policy: an
//! in-flight fetch is always shared.

use std::time::Duration;

/// What a policy gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct EntryInfo<'a> {
    pub key: &'a str,
    pub version: u64,
    /// Time since the entry's cell was installed.
    pub age: Duration,
}

pub trait StalenessPolicy: Send + Sync + 'static {
    fn is_stale(&self, entry: &EntryInfo<'_>) -> bool;
}

/// Entries live until explicitly revalidated, mutated, or evicted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStale;

impl StalenessPolicy for NeverStale {
    fn is_stale(&self, _entry: &EntryInfo<'_>) -> bool {
        false
    }
}

/// Entries older than the given duration are refetched on the next `get`.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub Duration);

impl StalenessPolicy for MaxAge {
    fn is_stale(&self, entry: &EntryInfo<'_>) -> bool {
        entry.age >= self.0
    }
}

impl<F> StalenessPolicy for F
where
    F: Fn(&EntryInfo<'_>) -> bool + Send + Sync + 'static,
{
    fn is_stale(&self, entry: &EntryInfo<'_>) -> bool {
        self(entry)
    }
}
