//! Per-caller fetch context.

use crate::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Why an object is being fetched.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum FetchCause {
    /// No attribution available.
    #[default]
    Unknown,

    /// A filesystem request (read, lookup, readdir...).
    Fs,

    /// An explicit request through the control interface.
    Control,

    /// Cache warming ahead of need.
    Prefetch,
}

/// Where a fetched object came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchOrigin {
    /// Served synchronously by the local store.
    LocalStore,

    /// Went through the import queue.
    Queue,
}

impl FetchOrigin {
    fn index(&self) -> usize {
        match self {
            Self::LocalStore => 0,
            Self::Queue => 1,
        }
    }
}

/// Carries the identity of a caller for metrics attribution and counts
/// how that caller's fetches were served.
#[derive(Debug, Default)]
pub struct FetchContext {
    cause: FetchCause,
    client_pid: Option<u32>,
    counts: [[AtomicU64; 2]; 2],
}

/// Trait-object-style shared [FetchContext].
pub type DynFetchContext = Arc<FetchContext>;

impl FetchContext {
    /// Construct a new context.
    pub fn new(cause: FetchCause, client_pid: Option<u32>) -> Self {
        Self {
            cause,
            client_pid,
            counts: Default::default(),
        }
    }

    /// A context without any attribution, for internal fetches and tests.
    pub fn null() -> DynFetchContext {
        Arc::new(Self::default())
    }

    /// Why the fetch is happening.
    pub fn cause(&self) -> FetchCause {
        self.cause
    }

    /// The pid of the client process, if known.
    pub fn client_pid(&self) -> Option<u32> {
        self.client_pid
    }

    /// Record that an object was served from `origin`.
    pub fn did_fetch(&self, kind: ObjectKind, origin: FetchOrigin) {
        self.counts[kind_index(kind)][origin.index()]
            .fetch_add(1, Ordering::Relaxed);
    }

    /// How many objects of `kind` were served from `origin`.
    pub fn fetch_count(&self, kind: ObjectKind, origin: FetchOrigin) -> u64 {
        self.counts[kind_index(kind)][origin.index()].load(Ordering::Relaxed)
    }
}

fn kind_index(kind: ObjectKind) -> usize {
    match kind {
        ObjectKind::Blob => 0,
        ObjectKind::Tree => 1,
    }
}
