//! Backing store error types.

use crate::ObjectId;
use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The backing store error type.
///
/// This type is required to implement `Clone`: a single import request
/// may have many interested parties, and each one of them receives the
/// same failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The remote source reported that the object does not exist.
    #[error("object {id} not found: {ctx}")]
    NotFound {
        /// The id of the missing object.
        id: ObjectId,

        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// The remote fetch itself failed (transport error, crashed helper
    /// process, panicking fetch routine, ...).
    #[error("remote fetch failed: {ctx} (src: {src})")]
    Remote {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// The store was stopped while the request was waiting.
    #[error("stopped while waiting: {ctx}")]
    Shutdown {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// No proxy metadata is known for this object, so the remote fetch
    /// cannot be issued.
    #[error("missing proxy metadata for {id}")]
    MissingProxy {
        /// The id without proxy metadata.
        id: ObjectId,
    },

    /// A caller supplied an invalid argument.
    #[error("invalid argument: {ctx}")]
    InvalidArgument {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// Generic internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

fn to_ctx<C: std::fmt::Display>(ctx: C) -> Arc<str> {
    ctx.to_string().into_boxed_str().into()
}

impl StoreError {
    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: to_ctx(ctx),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: to_ctx(ctx),
            src: DynInnerError::default(),
        }
    }

    /// Construct a "remote" error with an inner source error.
    pub fn remote_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Remote {
            ctx: to_ctx(ctx),
            src: DynInnerError::new(src),
        }
    }

    /// Construct a "remote" error.
    pub fn remote<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Remote {
            ctx: to_ctx(ctx),
            src: DynInnerError::default(),
        }
    }

    /// Construct a "not found" error.
    pub fn not_found<C: std::fmt::Display>(id: ObjectId, ctx: C) -> Self {
        Self::NotFound {
            id,
            ctx: to_ctx(ctx),
        }
    }

    /// Construct a "shutdown" error.
    pub fn shutdown<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Shutdown { ctx: to_ctx(ctx) }
    }

    /// Construct an "invalid argument" error.
    pub fn invalid_argument<C: std::fmt::Display>(ctx: C) -> Self {
        Self::InvalidArgument { ctx: to_ctx(ctx) }
    }

    /// True if this error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True if this error was caused by the store shutting down.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }
}

/// The backing store result type.
pub type StoreResult<T> = Result<T, StoreError>;
