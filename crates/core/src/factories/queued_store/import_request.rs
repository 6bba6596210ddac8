//! Import requests and the promise slots of their interested parties.

use backstore_api::*;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};
use tokio::sync::oneshot;

/// The value a worker produced for one item of a request.
#[derive(Debug, Clone)]
pub(crate) enum Fetched {
    Blob(Blob),
    Tree(Tree),
}

/// One pending fetch. Created on the first enqueue of its key(s),
/// discarded once every interested party has been fulfilled.
#[derive(Debug)]
pub(crate) struct ImportRequest {
    /// Monotonically increasing, shared with the trace events.
    pub unique: u64,
    pub kind: ImportKind,
    /// Exactly one item for blob and tree imports, any number for a
    /// prefetch.
    pub items: Vec<FetchItem>,
    pub cause: FetchCause,
    pub queued_at: Instant,
}

impl ImportRequest {
    pub fn new(
        unique: u64,
        kind: ImportKind,
        items: Vec<FetchItem>,
        cause: FetchCause,
    ) -> Self {
        Self {
            unique,
            kind,
            items,
            cause,
            queued_at: Instant::now(),
        }
    }

    /// The dedup key of an item of this request.
    pub fn key_for(&self, item: &FetchItem) -> ObjectKey {
        key_for(self.kind, &item.id)
    }

    /// The item identifying this request in trace events.
    pub fn trace_item(&self) -> Option<&FetchItem> {
        self.items.first()
    }
}

/// Prefetches warm blobs, so they share the blob key space.
pub(crate) fn key_for(kind: ImportKind, id: &ObjectId) -> ObjectKey {
    match kind {
        ImportKind::Tree => ObjectKey::tree(id.clone()),
        ImportKind::Blob | ImportKind::Prefetch => ObjectKey::blob(id.clone()),
    }
}

/// The promise slot of one interested party.
#[derive(Debug)]
pub(crate) enum Waiter {
    Blob(oneshot::Sender<StoreResult<Blob>>),
    Tree(oneshot::Sender<StoreResult<Tree>>),
    /// Only interested in completion, as is a prefetch.
    Done(oneshot::Sender<StoreResult<()>>),
}

impl Waiter {
    pub fn blob() -> (Self, ImportFuture<Blob>) {
        let (tx, rx) = oneshot::channel();
        (Self::Blob(tx), ImportFuture { rx })
    }

    pub fn tree() -> (Self, ImportFuture<Tree>) {
        let (tx, rx) = oneshot::channel();
        (Self::Tree(tx), ImportFuture { rx })
    }

    pub fn done() -> (Self, ImportFuture<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Done(tx), ImportFuture { rx })
    }

    /// Deliver the result of the import. A party that stopped waiting
    /// (dropped its future) is silently skipped.
    pub fn fulfill(self, result: &StoreResult<Fetched>) {
        match (self, result) {
            (Self::Blob(tx), Ok(Fetched::Blob(blob))) => {
                let _ = tx.send(Ok(blob.clone()));
            }
            (Self::Tree(tx), Ok(Fetched::Tree(tree))) => {
                let _ = tx.send(Ok(tree.clone()));
            }
            (Self::Done(tx), Ok(_)) => {
                let _ = tx.send(Ok(()));
            }
            (waiter, Ok(_)) => waiter.fail(StoreError::other(
                "import produced an object of an unexpected kind",
            )),
            (waiter, Err(err)) => waiter.fail(err.clone()),
        }
    }

    pub fn fail(self, err: StoreError) {
        match self {
            Self::Blob(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Tree(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Done(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// The future handed to an interested party.
///
/// If the promise slot is dropped without being fulfilled (the store
/// was torn down with the request still pending) the future resolves
/// to [StoreError::Shutdown] instead of hanging.
#[derive(Debug)]
#[must_use = "an import future does nothing unless awaited"]
pub struct ImportFuture<T> {
    rx: oneshot::Receiver<StoreResult<T>>,
}

impl<T> Future for ImportFuture<T> {
    type Output = StoreResult<T>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| {
            r.unwrap_or_else(|_| {
                Err(StoreError::shutdown("import request was dropped"))
            })
        })
    }
}
