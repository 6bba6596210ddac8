//! The queued backing store is a [BackingStore] that turns fetches of
//! trees and blobs missing from the local store into import requests,
//! serviced in batches by a fixed pool of workers calling the
//! [BackingFetcher].
//!
//! It consists of multiple parts:
//! - The import request queue, deduplicating requests by [ObjectKey]
//!   and partitioning them by [ImportKind].
//! - The import workers, draining the queue one homogeneous batch at a
//!   time.
//! - The trace bus, publishing queue/start/finish events of every
//!   import to any number of lossy subscribers.
//! - Import metrics, fetch path recording and fetch path logging.
//!
//! ### Fetch path
//!
//! [BackingStore::get_blob] and [BackingStore::get_tree] check the local
//! store synchronously. On a miss they load the proxy metadata of the
//! object, enqueue an import and return its future. Nothing on the
//! caller's path waits for the remote source.
//!
//! ### Teardown
//!
//! [BackingStore::shutdown] (or dropping the store) stops the queue,
//! failing everything still queued, then joins the workers (aborting
//! them after the configured timeout), fails whatever they left behind
//! and finally closes the trace bus. Every future handed out by the
//! store resolves. Concurrent calls to shutdown all wait for the same
//! teardown.

use crate::trace_bus::{TraceBus, TraceSubscription};
use backstore_api::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

mod fetch_recorder;
mod import_request;
mod log_throttle;
mod metrics;
mod queue;
mod worker;

use fetch_recorder::FetchRecorder;
use log_throttle::LogThrottle;
use queue::ImportRequestQueue;
use worker::ImportWorker;

pub use metrics::{ImportMetrics, RequestMetric, RequestStage};
pub use queue::PrefetchFailurePolicy;

/// QueuedBackingStore configuration types.
pub mod config {
    use super::PrefetchFailurePolicy;
    use backstore_api::*;
    use std::time::Duration;

    /// Configuration parameters for
    /// [QueuedBackingStoreFactory](super::QueuedBackingStoreFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct QueuedBackingStoreConfig {
        /// Number of import workers. Default: 32.
        pub worker_count: usize,

        /// Maximum number of blob requests per fetch call. Default: 128.
        pub blob_batch_size: usize,

        /// Maximum number of tree requests per fetch call. Default: 32.
        pub tree_batch_size: usize,

        /// Maximum number of prefetch requests per fetch call.
        /// Default: 4.
        pub prefetch_batch_size: usize,

        /// How prefetch futures treat failed members.
        /// Default: best effort.
        pub prefetch_failure_policy: PrefetchFailurePolicy,

        /// Trace events buffered per trace subscriber. Default: 1024.
        pub trace_bus_capacity: usize,

        /// Minimum interval between two missing proxy warnings.
        /// Default: 10 s.
        pub missing_proxy_log_interval_ms: u64,

        /// How long shutdown waits for workers before aborting them.
        /// Default: 5 s.
        pub shutdown_timeout_ms: u64,

        /// Log every fetch whose path matches this regex.
        /// Default: unset.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub log_fetch_path_regex: Option<String>,
    }

    impl Default for QueuedBackingStoreConfig {
        fn default() -> Self {
            Self {
                worker_count: 32,
                blob_batch_size: 128,
                tree_batch_size: 32,
                prefetch_batch_size: 4,
                prefetch_failure_policy: PrefetchFailurePolicy::default(),
                trace_bus_capacity:
                    crate::trace_bus::DEFAULT_TRACE_BUS_CAPACITY,
                missing_proxy_log_interval_ms: 10_000,
                shutdown_timeout_ms: 5_000,
                log_fetch_path_regex: None,
            }
        }
    }

    impl QueuedBackingStoreConfig {
        /// Batch sizes indexed by [ImportKind::index].
        pub fn batch_sizes(&self) -> [usize; 3] {
            [
                self.blob_batch_size,
                self.tree_batch_size,
                self.prefetch_batch_size,
            ]
        }

        /// Get the missing proxy log interval as a [Duration].
        pub fn missing_proxy_log_interval(&self) -> Duration {
            Duration::from_millis(self.missing_proxy_log_interval_ms)
        }

        /// Get the shutdown timeout as a [Duration].
        pub fn shutdown_timeout(&self) -> Duration {
            Duration::from_millis(self.shutdown_timeout_ms)
        }

        /// Compile [Self::log_fetch_path_regex], if set.
        pub fn fetch_path_regex(&self) -> StoreResult<Option<regex::Regex>> {
            self.log_fetch_path_regex
                .as_deref()
                .map(|re| {
                    regex::Regex::new(re).map_err(|err| {
                        StoreError::invalid_argument(format!(
                            "logFetchPathRegex: {err}"
                        ))
                    })
                })
                .transpose()
        }

        /// Check that this configuration can run.
        pub fn validate(&self) -> StoreResult<()> {
            if self.worker_count == 0 {
                return Err(StoreError::invalid_argument(
                    "workerCount must be at least 1",
                ));
            }
            for (kind, size) in ImportKind::ALL.iter().zip(self.batch_sizes())
            {
                if size == 0 {
                    return Err(StoreError::invalid_argument(format!(
                        "{kind} batch size must be at least 1"
                    )));
                }
            }
            if self.trace_bus_capacity == 0 {
                return Err(StoreError::invalid_argument(
                    "traceBusCapacity must be at least 1",
                ));
            }
            self.fetch_path_regex()?;
            Ok(())
        }
    }

    /// Module-level configuration for QueuedBackingStore.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct QueuedBackingStoreModConfig {
        /// QueuedBackingStore configuration.
        pub queued_backing_store: QueuedBackingStoreConfig,
    }
}

pub use config::*;

/// The default backing store factory.
#[derive(Debug)]
pub struct QueuedBackingStoreFactory {}

impl QueuedBackingStoreFactory {
    /// Construct a new QueuedBackingStoreFactory.
    pub fn create() -> DynBackingStoreFactory {
        let out: DynBackingStoreFactory = Arc::new(Self {});
        out
    }
}

impl BackingStoreFactory for QueuedBackingStoreFactory {
    fn default_config(&self, config: &mut Config) -> StoreResult<()> {
        config.set_module_config(&QueuedBackingStoreModConfig::default())
    }

    fn validate_config(&self, config: &Config) -> StoreResult<()> {
        let config: QueuedBackingStoreModConfig = config.get_module_config()?;
        config.queued_backing_store.validate()
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
        local_store: DynLocalStore,
        fetcher: DynBackingFetcher,
    ) -> BoxFut<'static, StoreResult<DynBackingStore>> {
        Box::pin(async move {
            let config: QueuedBackingStoreModConfig =
                builder.config.get_module_config()?;
            let out: DynBackingStore = Arc::new(QueuedBackingStore::new(
                config.queued_backing_store,
                local_store,
                fetcher,
            )?);
            Ok(out)
        })
    }
}

fn ready<T: Send + 'static>(
    result: StoreResult<T>,
) -> BoxFut<'static, StoreResult<T>> {
    Box::pin(async move { result })
}

/// The state shared with futures that outlive a single call.
#[derive(Debug)]
struct Inner {
    config: QueuedBackingStoreConfig,
    local_store: DynLocalStore,
    fetcher: DynBackingFetcher,
    queue: Arc<ImportRequestQueue>,
    recorder: FetchRecorder,
    missing_proxy_log: LogThrottle,
    fetch_path_regex: Option<regex::Regex>,
}

impl Inner {
    fn get_blob(
        &self,
        id: ObjectId,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<Blob>> {
        match self.local_store.get_blob(&id) {
            Ok(Some(blob)) => {
                context.did_fetch(ObjectKind::Blob, FetchOrigin::LocalStore);
                return ready(Ok(blob));
            }
            Ok(None) => (),
            Err(err) => return ready(Err(err)),
        }

        let item = match self.load_proxy(id) {
            Ok(item) => item,
            Err(err) => return ready(Err(err)),
        };
        self.log_backing_store_fetch(ObjectKind::Blob, &item, &context);

        let fut = self.queue.enqueue_blob(item, context.cause());
        Box::pin(async move {
            let blob = fut.await?;
            context.did_fetch(ObjectKind::Blob, FetchOrigin::Queue);
            Ok(blob)
        })
    }

    fn get_tree(
        &self,
        id: ObjectId,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<Tree>> {
        match self.local_store.get_tree(&id) {
            Ok(Some(tree)) => {
                context.did_fetch(ObjectKind::Tree, FetchOrigin::LocalStore);
                return ready(Ok(tree));
            }
            Ok(None) => (),
            Err(err) => return ready(Err(err)),
        }

        let item = match self.load_proxy(id) {
            Ok(item) => item,
            Err(err) => return ready(Err(err)),
        };
        self.log_backing_store_fetch(ObjectKind::Tree, &item, &context);

        let fut = self.queue.enqueue_tree(item, context.cause());
        Box::pin(async move {
            let tree = fut.await?;
            context.did_fetch(ObjectKind::Tree, FetchOrigin::Queue);
            Ok(tree)
        })
    }

    fn prefetch_blobs(
        &self,
        ids: Vec<ObjectId>,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<()>> {
        let policy = self.config.prefetch_failure_policy;
        let mut items = Vec::with_capacity(ids.len());

        for id in ids {
            match self.local_store.get_blob(&id) {
                Ok(Some(_)) => continue,
                Ok(None) => (),
                Err(err) => return ready(Err(err)),
            }
            match self.load_proxy(id) {
                Ok(item) => items.push(item),
                // Nothing can be fetched without a proxy, a best effort
                // prefetch simply skips it.
                Err(_) if policy == PrefetchFailurePolicy::BestEffort => (),
                Err(err) => return ready(Err(err)),
            }
        }

        if items.is_empty() {
            return ready(Ok(()));
        }

        for item in items.iter() {
            self.log_backing_store_fetch(ObjectKind::Blob, item, &context);
        }

        self.queue.enqueue_prefetch(items, context.cause(), policy)
    }

    /// Resolve the proxy metadata the fetcher needs for `id`.
    fn load_proxy(&self, id: ObjectId) -> StoreResult<FetchItem> {
        match self.local_store.get_proxy(&id)? {
            Some(proxy) => Ok(FetchItem::new(id, proxy)),
            None => {
                if let Some(suppressed) = self.missing_proxy_log.check() {
                    tracing::warn!(
                        %id,
                        suppressed,
                        "no proxy metadata for object, cannot import it"
                    );
                }
                Err(StoreError::MissingProxy { id })
            }
        }
    }

    fn log_backing_store_fetch(
        &self,
        kind: ObjectKind,
        item: &FetchItem,
        context: &FetchContext,
    ) {
        if let Some(re) = &self.fetch_path_regex {
            if re.is_match(&item.proxy.path) {
                tracing::info!(
                    target: "backstore::fetch",
                    %kind,
                    id = %item.id,
                    path = %item.proxy.path,
                    cause = ?context.cause(),
                    client_pid = ?context.client_pid(),
                    "fetching from backing store"
                );
            }
        }

        if context.cause() != FetchCause::Prefetch {
            self.recorder.record(&item.proxy.path);
        }
    }

    /// Remember the root tree of `root_id`, along with the proxy needed to
    /// import it.
    fn record_root(
        &self,
        root_id: &RootId,
        tree_id: &ObjectId,
    ) -> StoreResult<()> {
        self.local_store.put_root_tree_id(root_id, tree_id)?;
        if self.local_store.get_proxy(tree_id)?.is_none() {
            self.local_store
                .put_proxy(tree_id, &ProxyHash::root(tree_id.clone()))?;
        }
        Ok(())
    }
}

/// A [BackingStore] importing missing objects through a deduplicating
/// request queue and a pool of import workers.
///
/// Must be constructed within a tokio runtime, the workers are spawned
/// onto it.
#[derive(Debug)]
pub struct QueuedBackingStore {
    inner: Arc<Inner>,
    trace_bus: Arc<TraceBus<ImportTraceEvent>>,
    metrics: Arc<ImportMetrics>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: tokio::sync::OnceCell<()>,
}

impl QueuedBackingStore {
    /// Construct a new store and start its workers.
    pub fn new(
        config: QueuedBackingStoreConfig,
        local_store: DynLocalStore,
        fetcher: DynBackingFetcher,
    ) -> StoreResult<Self> {
        config.validate()?;
        let fetch_path_regex = config.fetch_path_regex()?;
        tokio::runtime::Handle::try_current().map_err(|err| {
            StoreError::other_src("queued backing store needs a runtime", err)
        })?;

        let trace_bus = Arc::new(TraceBus::new(config.trace_bus_capacity));
        let metrics = Arc::new(ImportMetrics::default());
        let queue = Arc::new(ImportRequestQueue::new(
            config.batch_sizes(),
            trace_bus.clone(),
            metrics.clone(),
        ));

        let workers = (0..config.worker_count)
            .map(|worker_id| {
                ImportWorker::new(
                    worker_id,
                    queue.clone(),
                    fetcher.clone(),
                    local_store.clone(),
                    trace_bus.clone(),
                )
                .spawn()
            })
            .collect();

        tracing::debug!(
            worker_count = config.worker_count,
            "queued backing store started"
        );

        let inner = Arc::new(Inner {
            fetch_path_regex,
            missing_proxy_log: LogThrottle::new(
                config.missing_proxy_log_interval(),
            ),
            recorder: FetchRecorder::default(),
            queue,
            fetcher,
            local_store,
            config,
        });

        Ok(Self {
            inner,
            trace_bus,
            metrics,
            workers: Mutex::new(workers),
            stopped: tokio::sync::OnceCell::new(),
        })
    }

    /// The trace bus import events are published on.
    pub fn trace_bus(&self) -> &Arc<TraceBus<ImportTraceEvent>> {
        &self.trace_bus
    }

    /// Subscribe to import events published from now on.
    pub fn subscribe_trace(&self) -> TraceSubscription<ImportTraceEvent> {
        self.trace_bus.subscribe()
    }

    /// The import metrics of this store.
    pub fn metrics(&self) -> &ImportMetrics {
        &self.metrics
    }

    /// See [ImportMetrics::get].
    pub fn get_import_metric(
        &self,
        stage: RequestStage,
        kind: ImportKind,
        metric: RequestMetric,
    ) -> u64 {
        self.metrics.get(stage, kind, metric)
    }

    /// Number of requests waiting for a worker.
    pub fn pending_import_count(&self) -> usize {
        ImportKind::ALL
            .iter()
            .map(|kind| self.inner.queue.queued_len(*kind))
            .sum()
    }

    /// Number of objects queued or being imported.
    pub fn in_flight_import_count(&self) -> usize {
        self.inner.queue.in_flight_len()
    }

    /// True once the store stopped accepting imports.
    pub fn is_stopped(&self) -> bool {
        self.inner.queue.is_stopped()
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &QueuedBackingStoreConfig {
        &self.inner.config
    }

    /// The teardown sequence, run once however many callers ask.
    async fn stop(&self) {
        let queued = self.inner.queue.shutdown();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        let deadline =
            tokio::time::Instant::now() + self.inner.config.shutdown_timeout();
        for worker in workers {
            let abort = worker.abort_handle();
            if tokio::time::timeout_at(deadline, worker).await.is_err() {
                tracing::warn!("import worker did not exit in time");
                abort.abort();
            }
        }

        let in_flight = self
            .inner
            .queue
            .fail_all(StoreError::shutdown("backing store shut down"));

        self.trace_bus.close();

        tracing::debug!(queued, in_flight, "queued backing store stopped");
    }
}

impl BackingStore for QueuedBackingStore {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_root_tree(
        &self,
        root_id: RootId,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<Tree>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let known = inner.local_store.get_root_tree_id(&root_id)?;
            let tree_id = match known {
                Some(tree_id) => tree_id,
                None => {
                    let tree_id =
                        inner.fetcher.resolve_root(root_id.clone()).await?;
                    tracing::debug!(%root_id, %tree_id, "resolved root");
                    inner.record_root(&root_id, &tree_id)?;
                    tree_id
                }
            };
            inner.get_tree(tree_id, context).await
        })
    }

    fn get_tree(
        &self,
        id: ObjectId,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<Tree>> {
        self.inner.get_tree(id, context)
    }

    fn get_blob(
        &self,
        id: ObjectId,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<Blob>> {
        self.inner.get_blob(id, context)
    }

    fn prefetch_blobs(
        &self,
        ids: Vec<ObjectId>,
        context: DynFetchContext,
    ) -> BoxFut<'static, StoreResult<()>> {
        self.inner.prefetch_blobs(ids, context)
    }

    fn import_manifest_for_root(
        &self,
        root_id: RootId,
        manifest: ObjectId,
    ) -> BoxFut<'static, StoreResult<()>> {
        if let Err(err) = self.inner.record_root(&root_id, &manifest) {
            return ready(Err(err));
        }
        let fut = self.inner.get_tree(manifest, FetchContext::null());
        Box::pin(async move { fut.await.map(|_| ()) })
    }

    fn start_recording_fetch(&self) {
        self.inner.recorder.start();
    }

    fn record_fetch(&self, path: &str) {
        self.inner.recorder.record(path);
    }

    fn stop_recording_fetch(&self) -> HashSet<String> {
        self.inner.recorder.stop()
    }

    fn shutdown(&self) -> BoxFut<'_, ()> {
        // Later callers wait for the first one to finish.
        Box::pin(async move {
            self.stopped.get_or_init(|| self.stop()).await;
        })
    }
}

impl Drop for QueuedBackingStore {
    fn drop(&mut self) {
        self.inner.queue.shutdown();
        for worker in self.workers.lock().unwrap().drain(..) {
            worker.abort();
        }
        self.inner
            .queue
            .fail_all(StoreError::shutdown("backing store dropped"));
        self.trace_bus.close();
    }
}
