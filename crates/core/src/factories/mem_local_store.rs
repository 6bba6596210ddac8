//! The in-memory local store.

use backstore_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The factory for [MemLocalStore].
#[derive(Debug, Default)]
pub struct MemLocalStoreFactory {
    store: Option<Arc<MemLocalStore>>,
}

impl MemLocalStoreFactory {
    /// Construct a new MemLocalStoreFactory creating an empty store.
    pub fn create() -> DynLocalStoreFactory {
        let out: DynLocalStoreFactory = Arc::new(Self::default());
        out
    }

    /// Construct a factory handing out the given store, so that a test
    /// can seed and inspect it.
    pub fn with_store(store: Arc<MemLocalStore>) -> DynLocalStoreFactory {
        let out: DynLocalStoreFactory = Arc::new(Self { store: Some(store) });
        out
    }
}

impl LocalStoreFactory for MemLocalStoreFactory {
    fn default_config(&self, _config: &mut Config) -> StoreResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, StoreResult<DynLocalStore>> {
        let store = self.store.clone().unwrap_or_default();
        Box::pin(async move {
            let out: DynLocalStore = store;
            Ok(out)
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<ObjectId, Blob>,
    trees: HashMap<ObjectId, Tree>,
    proxies: HashMap<ObjectId, ProxyHash>,
    roots: HashMap<RootId, ObjectId>,
}

/// A [LocalStore] keeping everything in hash maps. Nothing is ever
/// evicted.
#[derive(Debug, Default)]
pub struct MemLocalStore(Mutex<Inner>);

impl MemLocalStore {
    /// Construct a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs held.
    pub fn blob_count(&self) -> usize {
        self.0.lock().unwrap().blobs.len()
    }

    /// Number of trees held.
    pub fn tree_count(&self) -> usize {
        self.0.lock().unwrap().trees.len()
    }

    /// True if the blob is held.
    pub fn has_blob(&self, id: &ObjectId) -> bool {
        self.0.lock().unwrap().blobs.contains_key(id)
    }
}

impl LocalStore for MemLocalStore {
    fn get_blob(&self, id: &ObjectId) -> StoreResult<Option<Blob>> {
        Ok(self.0.lock().unwrap().blobs.get(id).cloned())
    }

    fn put_blob(&self, blob: &Blob) -> StoreResult<()> {
        self.0
            .lock()
            .unwrap()
            .blobs
            .insert(blob.id.clone(), blob.clone());
        Ok(())
    }

    fn get_tree(&self, id: &ObjectId) -> StoreResult<Option<Tree>> {
        Ok(self.0.lock().unwrap().trees.get(id).cloned())
    }

    fn put_tree(&self, tree: &Tree) -> StoreResult<()> {
        self.0
            .lock()
            .unwrap()
            .trees
            .insert(tree.id.clone(), tree.clone());
        Ok(())
    }

    fn get_proxy(&self, id: &ObjectId) -> StoreResult<Option<ProxyHash>> {
        Ok(self.0.lock().unwrap().proxies.get(id).cloned())
    }

    fn put_proxy(&self, id: &ObjectId, proxy: &ProxyHash) -> StoreResult<()> {
        self.0
            .lock()
            .unwrap()
            .proxies
            .insert(id.clone(), proxy.clone());
        Ok(())
    }

    fn get_root_tree_id(&self, root: &RootId) -> StoreResult<Option<ObjectId>> {
        Ok(self.0.lock().unwrap().roots.get(root).cloned())
    }

    fn put_root_tree_id(
        &self,
        root: &RootId,
        tree_id: &ObjectId,
    ) -> StoreResult<()> {
        self.0
            .lock()
            .unwrap()
            .roots
            .insert(root.clone(), tree_id.clone());
        Ok(())
    }
}
