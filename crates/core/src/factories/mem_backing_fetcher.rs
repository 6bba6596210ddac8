//! An in-memory backing fetcher, standing in for the remote source in
//! tests and local experiments.
//!
//! Objects are looked up by the revision of their proxy metadata. The
//! fetcher can be slowed down, paused, told to fail individual objects
//! or whole calls, and records every call it receives.

use backstore_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// MemBackingFetcher configuration types.
pub mod config {
    /// Configuration parameters for
    /// [MemBackingFetcherFactory](super::MemBackingFetcherFactory).
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemBackingFetcherConfig {
        /// Simulated latency of every fetch call. Default: 0.
        pub latency_ms: u64,
    }

    /// Module-level configuration for MemBackingFetcher.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct MemBackingFetcherModConfig {
        /// MemBackingFetcher configuration.
        pub mem_backing_fetcher: MemBackingFetcherConfig,
    }
}

pub use config::*;

/// The factory for [MemBackingFetcher].
#[derive(Debug, Default)]
pub struct MemBackingFetcherFactory {
    fetcher: Option<Arc<MemBackingFetcher>>,
}

impl MemBackingFetcherFactory {
    /// Construct a new MemBackingFetcherFactory creating an empty fetcher.
    pub fn create() -> DynBackingFetcherFactory {
        let out: DynBackingFetcherFactory = Arc::new(Self::default());
        out
    }

    /// Construct a factory handing out the given fetcher. Its latency is
    /// left as is, the config is not consulted.
    pub fn with_fetcher(
        fetcher: Arc<MemBackingFetcher>,
    ) -> DynBackingFetcherFactory {
        let out: DynBackingFetcherFactory = Arc::new(Self {
            fetcher: Some(fetcher),
        });
        out
    }
}

impl BackingFetcherFactory for MemBackingFetcherFactory {
    fn default_config(&self, config: &mut Config) -> StoreResult<()> {
        config.set_module_config(&MemBackingFetcherModConfig::default())
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, StoreResult<DynBackingFetcher>> {
        let fetcher = self.fetcher.clone();
        Box::pin(async move {
            let out: DynBackingFetcher = match fetcher {
                Some(fetcher) => fetcher,
                None => {
                    let config: MemBackingFetcherModConfig =
                        builder.config.get_module_config()?;
                    Arc::new(MemBackingFetcher::new(Duration::from_millis(
                        config.mem_backing_fetcher.latency_ms,
                    )))
                }
            };
            Ok(out)
        })
    }
}

/// One call received by a [MemBackingFetcher].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    /// Which fetch routine was called.
    pub kind: ImportKind,

    /// The requested ids, in request order.
    pub ids: Vec<ObjectId>,
}

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<ObjectId, Blob>,
    trees: HashMap<ObjectId, Tree>,
    roots: HashMap<RootId, ObjectId>,
    failures: HashMap<ObjectId, StoreError>,
    transport_failure: Option<StoreError>,
    panic: bool,
    latency: Duration,
    calls: Vec<FetchCall>,
    fetch_counts: HashMap<ObjectId, usize>,
}

/// See the [module docs](self).
#[derive(Debug)]
pub struct MemBackingFetcher {
    state: Mutex<State>,
    paused: watch::Sender<bool>,
}

impl Default for MemBackingFetcher {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl MemBackingFetcher {
    /// Construct a new, empty fetcher answering every call after
    /// `latency`.
    pub fn new(latency: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                latency,
                ..Default::default()
            }),
            paused: watch::Sender::new(false),
        }
    }

    /// Make a blob available, keyed by its id.
    pub fn insert_blob(&self, blob: Blob) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(blob.id.clone(), blob);
    }

    /// Make a tree available, keyed by its id.
    pub fn insert_tree(&self, tree: Tree) {
        self.state
            .lock()
            .unwrap()
            .trees
            .insert(tree.id.clone(), tree);
    }

    /// Make a root resolvable.
    pub fn insert_root(&self, root: RootId, tree_id: ObjectId) {
        self.state.lock().unwrap().roots.insert(root, tree_id);
    }

    /// Fail every future fetch of `id` with `err`.
    pub fn fail_object(&self, id: ObjectId, err: StoreError) {
        self.state.lock().unwrap().failures.insert(id, err);
    }

    /// Fail every future call as a whole with `err`, or stop doing so.
    pub fn set_transport_failure(&self, err: Option<StoreError>) {
        self.state.lock().unwrap().transport_failure = err;
    }

    /// Panic in every future call, or stop doing so.
    pub fn set_panic(&self, panic: bool) {
        self.state.lock().unwrap().panic = panic;
    }

    /// Change the simulated latency.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Hold every call, including calls already waiting out their
    /// latency, until [MemBackingFetcher::resume].
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Release held calls.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<FetchCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// How many times `id` was requested, over all calls.
    pub fn fetch_count(&self, id: &ObjectId) -> usize {
        self.state
            .lock()
            .unwrap()
            .fetch_counts
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Record the call, wait out latency and pause, then apply injected
    /// whole-call failures.
    async fn begin(
        &self,
        kind: ImportKind,
        items: &[FetchItem],
    ) -> StoreResult<()> {
        let latency = {
            let mut lock = self.state.lock().unwrap();
            lock.calls.push(FetchCall {
                kind,
                ids: items.iter().map(|i| i.id.clone()).collect(),
            });
            for item in items {
                *lock.fetch_counts.entry(item.id.clone()).or_default() += 1;
            }
            lock.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut paused = self.paused.subscribe();
        // The sender lives as long as self, this cannot fail.
        let _ = paused.wait_for(|paused| !*paused).await;

        let lock = self.state.lock().unwrap();
        if lock.panic {
            drop(lock);
            panic!("injected {kind} fetch panic");
        }
        match &lock.transport_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn lookup<T: Clone>(
        &self,
        items: &[FetchItem],
        objects: impl Fn(&State) -> &HashMap<ObjectId, T>,
    ) -> Vec<StoreResult<T>> {
        let lock = self.state.lock().unwrap();
        let state: &State = &lock;
        items
            .iter()
            .map(|item| {
                if let Some(err) = state.failures.get(&item.id) {
                    return Err(err.clone());
                }
                objects(state)
                    .get(&item.proxy.revision)
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::not_found(
                            item.id.clone(),
                            format!("no object at {:?}", item.proxy.path),
                        )
                    })
            })
            .collect()
    }
}

impl BackingFetcher for MemBackingFetcher {
    fn fetch_blobs(
        &self,
        items: Vec<FetchItem>,
    ) -> BoxFut<'_, BatchResult<Blob>> {
        Box::pin(async move {
            self.begin(ImportKind::Blob, &items).await?;
            Ok(self.lookup(&items, |s| &s.blobs))
        })
    }

    fn fetch_trees(
        &self,
        items: Vec<FetchItem>,
    ) -> BoxFut<'_, BatchResult<Tree>> {
        Box::pin(async move {
            self.begin(ImportKind::Tree, &items).await?;
            Ok(self.lookup(&items, |s| &s.trees))
        })
    }

    fn fetch_prefetch_set(
        &self,
        items: Vec<FetchItem>,
    ) -> BoxFut<'_, BatchResult<Blob>> {
        Box::pin(async move {
            self.begin(ImportKind::Prefetch, &items).await?;
            Ok(self.lookup(&items, |s| &s.blobs))
        })
    }

    fn resolve_root(&self, root: RootId) -> BoxFut<'_, StoreResult<ObjectId>> {
        Box::pin(async move {
            let found = self.state.lock().unwrap().roots.get(&root).cloned();
            match found {
                Some(tree_id) => Ok(tree_id),
                None => Err(StoreError::not_found(
                    ObjectId::from_hex(&root)?,
                    "unknown root",
                )),
            }
        })
    }
}
