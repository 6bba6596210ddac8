#![deny(missing_docs)]
//! Backing store API contains the traits of the queued backing store's
//! collaborators and the basic types required to define them.
//!
//! If you want the queued backing store itself, please see the
//! backstore_core crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

mod error;
pub use error::*;

pub mod id;
pub use id::{ObjectId, RootId};

mod object;
pub use object::*;

pub mod config;
pub use config::Config;

mod context;
pub use context::*;

pub mod local_store;
pub use local_store::*;

pub mod fetcher;
pub use fetcher::*;

pub mod backing_store;
pub use backing_store::*;

pub mod trace;
pub use trace::*;

pub mod builder;
pub use builder::Builder;
