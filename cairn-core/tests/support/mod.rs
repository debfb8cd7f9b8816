//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use cairn_core::FetchError;

/// A mountain record as served by the demo API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mountain {
    pub title: String,
    pub description: String,
    pub height: String,
    pub countries: Vec<String>,
    pub continent: String,
    pub image: String,
    pub slug: String,
    pub updated_at: String,
}

pub fn mountain(title: &str, continent: &str) -> Mountain {
    Mountain {
        title: title.to_string(),
        description: format!("{title} is a mountain in {continent}."),
        height: "8000m".to_string(),
        countries: vec![],
        continent: continent.to_string(),
        image: format!("https://example.com/{}.jpg", title.to_lowercase()),
        slug: title.to_lowercase().replace(' ', "-"),
        updated_at: "2021-01-01T00:00:00.000Z".to_string(),
    }
}

pub fn sample_mountains() -> Vec<Mountain> {
    vec![
        mountain("Everest", "Asia"),
        mountain("Mont Blanc", "Europe"),
        mountain("K2", "Asia"),
    ]
}

type Reply<T> = oneshot::Sender<Result<T, FetchError>>;

/// A fetcher whose calls stay pending until the test answers them.
///
/// Calls are numbered in the order they were made.
pub struct Gate<T> {
    pending: Arc<Mutex<Vec<(String, Option<Reply<T>>)>>>,
    calls: Arc<AtomicUsize>,
}

impl<T> Gate<T>
where
    T: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fetcher(
        &self,
    ) -> impl Fn(String) -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static {
        let pending = self.pending.clone();
        let calls = self.calls.clone();
        move |key: String| {
            let (tx, rx) = oneshot::channel();
            pending.lock().push((key, Some(tx)));
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                rx.await
                    .unwrap_or_else(|_| Err(FetchError::new("fetch abandoned")))
            }
            .boxed()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn key(&self, call: usize) -> String {
        self.pending.lock()[call].0.clone()
    }

    pub fn resolve(&self, call: usize, value: T) {
        self.answer(call, Ok(value));
    }

    pub fn reject(&self, call: usize, err: FetchError) {
        self.answer(call, Err(err));
    }

    fn answer(&self, call: usize, outcome: Result<T, FetchError>) {
        let reply = self.pending.lock()[call]
            .1
            .take()
            .expect("fetch call already answered");
        let _ = reply.send(outcome);
    }
}

/// Counts listener invocations.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn listener(&self) -> impl Fn() + Send + Sync + 'static {
        let count = self.0.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
