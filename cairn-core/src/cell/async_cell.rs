//! AsyncCell Implementation
//!
//! An AsyncCell holds the outcome of exactly one asynchronous operation.
//!
//! # Lifecycle
//!
//! 1. The cell is created when the operation starts and is `Pending`.
//!
//! 2. When the operation settles the cell moves to `Resolved` or `Failed`.
//!    This happens at most once; later settle attempts are ignored.
//!
//! 3. Listeners registered with [`AsyncCell::on_settle`] run once, right
//!    after the transition. Suspended readers are woken after the
//!    listeners have run.
//!
//! # Reading
//!
//! [`AsyncCell::read`] is the blocking-read form: it returns the value,
//! the stored error, or a [`Suspension`] to await before reading again.
//! [`AsyncCell::peek`] never suspends.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use super::Suspension;
use crate::error::{panic_message, LoadError, ReadError};

/// Identity of a cell, stable across clones of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell #{}", self.0)
    }
}

/// Tri-state outcome of an asynchronous operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CellState<T> {
    Pending,
    Resolved(T),
    Failed(LoadError),
}

impl<T> CellState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, CellState::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CellState::Resolved(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CellState::Failed(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            CellState::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            CellState::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LoadError> {
        match self {
            CellState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

type SettleListener = Box<dyn FnOnce() + Send>;

struct CellInner<T> {
    id: CellId,
    state: Mutex<CellState<T>>,
    settled: watch::Sender<bool>,
    listeners: Mutex<Vec<SettleListener>>,
}

/// Shared handle to a tri-state asynchronous value.
///
/// Clones share the same underlying cell.
pub struct AsyncCell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> AsyncCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn with_state(state: CellState<T>) -> Self {
        let settled = !state.is_pending();
        let (tx, _rx) = watch::channel(settled);
        Self {
            inner: Arc::new(CellInner {
                id: CellId::next(),
                state: Mutex::new(state),
                settled: tx,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start `operation` on the ambient tokio runtime and return a pending
    /// cell for its outcome.
    ///
    /// A panic inside the operation settles the cell as failed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F, E>(operation: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<LoadError>,
    {
        let cell = Self::pending();
        cell.drive(operation);
        cell
    }

    /// A pending cell with nothing driving it yet.
    pub(crate) fn pending() -> Self {
        Self::with_state(CellState::Pending)
    }

    /// Run `operation` on the ambient runtime and settle this cell with its
    /// outcome.
    pub(crate) fn drive<F, E>(&self, operation: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<LoadError>,
    {
        let target = self.clone();
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(operation).catch_unwind().await {
                Ok(result) => result.map_err(Into::into),
                Err(payload) => Err(LoadError::Derivation {
                    node: target.id().to_string(),
                    message: panic_message(payload),
                }),
            };
            target.settle(outcome);
        });
    }

    /// A cell that is already resolved. No runtime required.
    pub fn resolved(value: T) -> Self {
        Self::with_state(CellState::Resolved(value))
    }

    /// A cell that has already failed. No runtime required.
    pub fn failed(error: impl Into<LoadError>) -> Self {
        Self::with_state(CellState::Failed(error.into()))
    }

    /// Move a pending cell to its final state.
    ///
    /// Returns `false` if the cell had already settled.
    pub(crate) fn settle(&self, outcome: Result<T, LoadError>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !state.is_pending() {
                return false;
            }
            *state = match outcome {
                Ok(value) => CellState::Resolved(value),
                Err(err) => CellState::Failed(err),
            };
        }

        trace!(cell = %self.inner.id, "cell settled");

        // Listeners invalidate dependents before readers wake and re-read.
        let listeners = std::mem::take(&mut *self.inner.listeners.lock());
        for listener in listeners {
            listener();
        }
        self.inner.settled.send_replace(true);
        true
    }

    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Whether both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Blocking read.
    ///
    /// Returns the value if resolved, the stored error if failed, and a
    /// [`Suspension`] that completes on settlement if still pending.
    pub fn read(&self) -> Result<T, ReadError> {
        match &*self.inner.state.lock() {
            CellState::Resolved(value) => Ok(value.clone()),
            CellState::Failed(err) => Err(ReadError::Failed(err.clone())),
            CellState::Pending => Err(ReadError::Suspended(self.suspension())),
        }
    }

    /// Non-blocking snapshot of the current state.
    pub fn peek(&self) -> CellState<T> {
        self.inner.state.lock().clone()
    }

    pub fn is_settled(&self) -> bool {
        !self.inner.state.lock().is_pending()
    }

    /// An awaitable that completes once this cell settles.
    pub fn suspension(&self) -> Suspension {
        Suspension::until_set(self.inner.id.to_string(), self.inner.settled.subscribe())
    }

    /// Wait for settlement and return the final state.
    pub async fn settled(&self) -> CellState<T> {
        self.suspension().wait().await;
        self.peek()
    }

    /// Run `listener` once the cell settles.
    ///
    /// If the cell has already settled the listener runs immediately, on
    /// the calling thread.
    pub fn on_settle<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let state = self.inner.state.lock();
            if state.is_pending() {
                self.inner.listeners.lock().push(Box::new(listener));
                return;
            }
        }
        listener();
    }
}

impl<T> Clone for AsyncCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for AsyncCell<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCell")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}
