#![deny(missing_docs)]
//! Queued backing store: deduplicating, batching import of trees and
//! blobs from a slow remote source into a local store.

use backstore_api::{builder::Builder, config::Config, *};

/// Construct a default builder around the given collaborators.
///
/// - `local_store` - where imported objects and their metadata live.
/// - `fetcher` - the remote source objects are imported from.
/// - `backing_store` - the default is
///   [factories::QueuedBackingStoreFactory].
pub fn default_builder(
    local_store: DynLocalStoreFactory,
    fetcher: DynBackingFetcherFactory,
) -> Builder {
    Builder {
        config: Config::default(),
        local_store,
        fetcher,
        backing_store: factories::QueuedBackingStoreFactory::create(),
    }
}

/// Construct a default builder for testing, wired to an in-memory
/// local store and an in-memory backing fetcher.
pub fn default_test_builder() -> Builder {
    default_builder(
        factories::MemLocalStoreFactory::create(),
        factories::MemBackingFetcherFactory::create(),
    )
}

pub mod factories;

pub mod trace_bus;
