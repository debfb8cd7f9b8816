//! Suspension handles.
//!
//! A [`Suspension`] is what a blocking read hands back instead of a value:
//! an awaitable that completes once whatever the reader was waiting on has
//! moved. It says nothing about the outcome; the reader is expected to read
//! again after it completes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use tokio::sync::watch;

#[derive(Clone)]
pub struct Suspension {
    origin: Arc<str>,
    ready: Shared<BoxFuture<'static, ()>>,
}

impl Suspension {
    pub(crate) fn new<F>(origin: impl Into<Arc<str>>, ready: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            origin: origin.into(),
            ready: ready.boxed().shared(),
        }
    }

    /// Complete once the flag behind `rx` turns true.
    pub(crate) fn until_set(origin: impl Into<Arc<str>>, mut rx: watch::Receiver<bool>) -> Self {
        Self::new(origin, async move {
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Complete on the next value published through `rx` after this call.
    pub(crate) fn until_changed<V>(origin: impl Into<Arc<str>>, mut rx: watch::Receiver<V>) -> Self
    where
        V: Send + Sync + 'static,
    {
        rx.mark_unchanged();
        Self::new(origin, async move {
            let _ = rx.changed().await;
        })
    }

    /// Complete on whichever of `self` and `other` completes first.
    ///
    /// The combined suspension keeps the origin of `self`.
    pub(crate) fn or(self, other: Suspension) -> Self {
        let origin = Arc::clone(&self.origin);
        let either = future::select(self.wait().boxed(), other.wait().boxed());
        Self::new(origin, either.map(|_| ()))
    }

    /// A suspension that is already complete: the reader should read again
    /// straight away.
    pub(crate) fn ready(origin: impl Into<Arc<str>>) -> Self {
        Self::new(origin, future::ready(()))
    }

    /// What the reader is waiting on, for diagnostics.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether some waiter has already observed the awaited event.
    pub fn is_ready(&self) -> bool {
        self.ready.peek().is_some()
    }

    /// Wait for the awaited event. Read again afterwards.
    pub async fn wait(self) {
        self.ready.await
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("origin", &self.origin)
            .finish()
    }
}

impl fmt::Display for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "suspended: waiting for {}", self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn until_set_completes_when_flag_flips() {
        let (tx, rx) = watch::channel(false);
        let suspension = Suspension::until_set("cell #1", rx);
        assert_eq!(suspension.origin(), "cell #1");

        let waiter = tokio::spawn(suspension.clone().wait());
        tx.send_replace(true);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn until_set_is_immediate_when_already_set() {
        let (_tx, rx) = watch::channel(true);
        Suspension::until_set("done", rx).wait().await;
    }

    #[tokio::test]
    async fn until_changed_ignores_the_current_value() {
        let (tx, rx) = watch::channel(0u64);
        tx.send_replace(1);
        let suspension = Suspension::until_changed("source", rx);

        let waiter = tokio::spawn(suspension.wait());
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tx.send_replace(2);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn or_completes_on_either_side() {
        let (cell_tx, cell_rx) = watch::channel(false);
        let (node_tx, node_rx) = watch::channel(0u64);
        let suspension = Suspension::until_set("cell #3", cell_rx)
            .or(Suspension::until_changed("source", node_rx));
        assert_eq!(suspension.origin(), "cell #3");

        let waiter = tokio::spawn(suspension.wait());
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // The cell never settles; the other side moving is enough.
        node_tx.send_replace(1);
        waiter.await.unwrap();
        drop(cell_tx);
    }

    #[tokio::test]
    async fn ready_suspension_does_not_wait() {
        let suspension = Suspension::ready("stale node");
        suspension.clone().wait().await;
        assert!(suspension.is_ready());
    }

    #[test]
    fn display_names_the_origin() {
        let (_tx, rx) = watch::channel(false);
        let suspension = Suspension::until_set("mountains", rx);
        assert_eq!(suspension.to_string(), "suspended: waiting for mountains");
    }
}
