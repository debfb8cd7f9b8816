//! The fetch collaborator.

use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt};

use crate::error::FetchError;

/// Retrieves the resource behind a cache key.
///
/// The cache never interprets keys or payloads; it only calls `fetch` when
/// it needs a fresh cell. Any `Fn(String) -> impl Future` closure is a
/// fetcher.
pub trait Fetcher<T>: Send + Sync + 'static {
    fn fetch(&self, key: &str) -> BoxFuture<'static, Result<T, FetchError>>;
}

impl<T, F, Fut> Fetcher<T> for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    fn fetch(&self, key: &str) -> BoxFuture<'static, Result<T, FetchError>> {
        self(key.to_owned()).boxed()
    }
}
