//! Remote fetch (backing fetcher) types.
//!
//! A [BackingFetcher] is the slow, out-of-process source of objects:
//! a helper daemon, a network client or a repository cache reader.
//! It only ever sees batches of same-kind [FetchItem]s and answers each
//! member individually.

use crate::*;
use std::sync::Arc;

/// One object to fetch, together with the proxy metadata the remote
/// source needs to locate it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchItem {
    /// The id the caller asked for.
    pub id: ObjectId,

    /// Path and remote revision of the object.
    pub proxy: ProxyHash,
}

impl FetchItem {
    /// Construct a fetch item.
    pub fn new(id: ObjectId, proxy: ProxyHash) -> Self {
        Self { id, proxy }
    }
}

/// Per-item results of a batch fetch, in the same order as the request.
pub type BatchResult<T> = StoreResult<Vec<StoreResult<T>>>;

/// The remote fetch collaborator consumed by the import workers.
///
/// An `Err` from a batch call means the call as a whole failed
/// (transport failure); the error is then delivered to every member
/// of the batch. Otherwise the returned vector must contain exactly one
/// result per requested item, in request order.
#[cfg_attr(any(test, feature = "mockall"), mockall::automock)]
pub trait BackingFetcher: 'static + Send + Sync + std::fmt::Debug {
    /// Fetch a batch of blobs.
    fn fetch_blobs(
        &self,
        items: Vec<FetchItem>,
    ) -> BoxFut<'_, BatchResult<Blob>>;

    /// Fetch a batch of trees.
    fn fetch_trees(
        &self,
        items: Vec<FetchItem>,
    ) -> BoxFut<'_, BatchResult<Tree>>;

    /// Fetch a set of blobs only to warm the local store. The default
    /// implementation is a plain [BackingFetcher::fetch_blobs].
    fn fetch_prefetch_set(
        &self,
        items: Vec<FetchItem>,
    ) -> BoxFut<'_, BatchResult<Blob>> {
        self.fetch_blobs(items)
    }

    /// Resolve a root to the id of its root tree.
    fn resolve_root(&self, root: RootId) -> BoxFut<'_, StoreResult<ObjectId>>;
}

/// Trait-object [BackingFetcher].
pub type DynBackingFetcher = Arc<dyn BackingFetcher>;

/// A factory for creating BackingFetcher instances.
pub trait BackingFetcherFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> StoreResult<()>;

    /// Construct a backing fetcher instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, StoreResult<DynBackingFetcher>>;
}

/// Trait-object [BackingFetcherFactory].
pub type DynBackingFetcherFactory = Arc<dyn BackingFetcherFactory>;
