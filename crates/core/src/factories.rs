//! Factories for generating instances of backing store modules.

pub mod queued_store;
pub use queued_store::{QueuedBackingStore, QueuedBackingStoreFactory};

pub mod mem_local_store;
pub use mem_local_store::{MemLocalStore, MemLocalStoreFactory};

pub mod mem_backing_fetcher;
pub use mem_backing_fetcher::{MemBackingFetcher, MemBackingFetcherFactory};
