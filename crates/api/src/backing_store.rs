//! The object-store contract consumed by the filesystem layer.

use crate::*;
use std::collections::HashSet;
use std::sync::Arc;

/// A source of trees and blobs named by content hash.
///
/// None of the fetch methods block the calling thread on a remote
/// fetch. Anything that has to wait for the remote source is reported
/// through the returned future, and every returned future eventually
/// resolves: with the object, with the fetch failure, or with
/// [StoreError::Shutdown] if the store is stopped first.
pub trait BackingStore: 'static + Send + Sync + std::fmt::Debug {
    /// To aid in concrete downcasting.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Parse the textual form of a root id.
    fn parse_root_id(&self, root_id: &str) -> StoreResult<RootId> {
        RootId::parse(root_id)
    }

    /// Render a root id to its textual form.
    fn render_root_id(&self, root_id: &RootId) -> String {
        root_id.to_string()
    }

    /// Get the root tree of a root.
    fn get_root_tree(
        &self,
        root_id: RootId,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<Tree>>;

    /// Get a tree.
    fn get_tree(
        &self,
        id: ObjectId,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<Tree>>;

    /// Get a blob.
    fn get_blob(
        &self,
        id: ObjectId,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<Blob>>;

    /// Warm the local store with a set of blobs. The individual blobs
    /// are not delivered, the future only signals completion.
    fn prefetch_blobs(
        &self,
        ids: Vec<ObjectId>,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<()>>;

    /// Record that `root_id` has the root tree `manifest` and import it.
    fn import_manifest_for_root(
        &self,
        root_id: RootId,
        manifest: ObjectId,
    ) -> BoxFut<'static, StoreResult<()>>;

    /// Start recording the paths of fetched objects.
    fn start_recording_fetch(&self);

    /// Record a fetched path. A no-op unless recording.
    fn record_fetch(&self, path: &str);

    /// Stop recording and return the paths recorded since
    /// [BackingStore::start_recording_fetch].
    fn stop_recording_fetch(&self) -> HashSet<String>;

    /// Stop accepting work, fail everything still pending, wait for the
    /// workers to exit and tear down the store. Idempotent.
    fn shutdown(&self) -> BoxFut<'_, ()>;
}

/// Trait-object [BackingStore].
pub type DynBackingStore = Arc<dyn BackingStore>;

/// A factory for creating BackingStore instances.
pub trait BackingStoreFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> StoreResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> StoreResult<()>;

    /// Construct a backing store instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
        local_store: DynLocalStore,
        fetcher: DynBackingFetcher,
    ) -> BoxFut<'static, StoreResult<DynBackingStore>>;
}

/// Trait-object [BackingStoreFactory].
pub type DynBackingStoreFactory = Arc<dyn BackingStoreFactory>;
