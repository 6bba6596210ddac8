//! Local store (on-disk cache) types.

use crate::*;
use std::sync::Arc;

/// The local cache of imported objects and their metadata.
///
/// Every method is synchronous and expected to be cheap: the queued
/// backing store calls [LocalStore::get_blob] and [LocalStore::get_tree]
/// on the caller's path before anything is enqueued. Implementations
/// must be internally thread-safe, the backing store never assumes
/// exclusive access.
#[cfg_attr(any(test, feature = "mockall"), mockall::automock)]
pub trait LocalStore: 'static + Send + Sync + std::fmt::Debug {
    /// Look up a blob.
    fn get_blob(&self, id: &ObjectId) -> StoreResult<Option<Blob>>;

    /// Persist a blob.
    fn put_blob(&self, blob: &Blob) -> StoreResult<()>;

    /// Look up a tree.
    fn get_tree(&self, id: &ObjectId) -> StoreResult<Option<Tree>>;

    /// Persist a tree.
    fn put_tree(&self, tree: &Tree) -> StoreResult<()>;

    /// Look up the proxy metadata needed to fetch `id` remotely.
    fn get_proxy(&self, id: &ObjectId) -> StoreResult<Option<ProxyHash>>;

    /// Record the proxy metadata for `id`.
    fn put_proxy(&self, id: &ObjectId, proxy: &ProxyHash) -> StoreResult<()>;

    /// Look up the root tree id of a root.
    fn get_root_tree_id(&self, root: &RootId) -> StoreResult<Option<ObjectId>>;

    /// Record the root tree id of a root.
    fn put_root_tree_id(
        &self,
        root: &RootId,
        tree_id: &ObjectId,
    ) -> StoreResult<()>;
}

/// Trait-object [LocalStore].
pub type DynLocalStore = Arc<dyn LocalStore>;

/// A factory for creating LocalStore instances.
pub trait LocalStoreFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> StoreResult<()>;

    /// Construct a local store instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, StoreResult<DynLocalStore>>;
}

/// Trait-object [LocalStoreFactory].
pub type DynLocalStoreFactory = Arc<dyn LocalStoreFactory>;
