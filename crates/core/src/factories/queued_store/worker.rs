//! Import workers.
//!
//! Each worker loops on: dequeue a batch of same-kind requests, publish
//! a start event per request, hand every item of the batch to the
//! backing fetcher in one call, persist what was fetched, then complete
//! the requests. A worker exits once the queue reports it is stopped.

use super::import_request::*;
use super::queue::ImportRequestQueue;
use crate::trace_bus::TraceBus;
use backstore_api::*;
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub(crate) struct ImportWorker {
    worker_id: usize,
    queue: Arc<ImportRequestQueue>,
    fetcher: DynBackingFetcher,
    local_store: DynLocalStore,
    trace_bus: Arc<TraceBus<ImportTraceEvent>>,
}

impl ImportWorker {
    pub fn new(
        worker_id: usize,
        queue: Arc<ImportRequestQueue>,
        fetcher: DynBackingFetcher,
        local_store: DynLocalStore,
        trace_bus: Arc<TraceBus<ImportTraceEvent>>,
    ) -> Self {
        Self {
            worker_id,
            queue,
            fetcher,
            local_store,
            trace_bus,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::task::spawn(self.run())
    }

    async fn run(self) {
        tracing::debug!(worker_id = self.worker_id, "import worker started");

        while let Some(batch) = self.queue.dequeue().await {
            self.process(batch).await;
        }

        tracing::debug!(worker_id = self.worker_id, "import worker exiting");
    }

    async fn process(&self, batch: Vec<Arc<ImportRequest>>) {
        let Some(kind) = batch.first().map(|r| r.kind) else {
            return;
        };

        for request in batch.iter() {
            tracing::trace!(
                worker_id = self.worker_id,
                unique = request.unique,
                cause = ?request.cause,
                "import started"
            );
            if let Some(item) = request.trace_item() {
                self.trace_bus.publish(ImportTraceEvent::start(
                    request.unique,
                    request.kind,
                    item,
                ));
            }
        }

        let items: Vec<FetchItem> = batch
            .iter()
            .flat_map(|r| r.items.iter().cloned())
            .collect();

        tracing::trace!(
            worker_id = self.worker_id,
            %kind,
            requests = batch.len(),
            items = items.len(),
            "servicing import batch"
        );

        let results = self.fetch(kind, items.clone()).await;
        self.persist(&items, &results);

        let mut results = results.into_iter();
        for request in batch.iter() {
            let these: Vec<StoreResult<Fetched>> =
                results.by_ref().take(request.items.len()).collect();
            self.queue.complete(request, these);
        }
    }

    /// Call the fetcher for `items`, producing exactly one result per
    /// item. A failed call, a panic or a malformed answer is delivered
    /// to every item alike.
    async fn fetch(
        &self,
        kind: ImportKind,
        items: Vec<FetchItem>,
    ) -> Vec<StoreResult<Fetched>> {
        let count = items.len();
        let fetcher = self.fetcher.clone();

        let call = async move {
            match kind {
                ImportKind::Blob => fetcher
                    .fetch_blobs(items)
                    .await
                    .map(|r| wrap(r, Fetched::Blob)),
                ImportKind::Tree => fetcher
                    .fetch_trees(items)
                    .await
                    .map(|r| wrap(r, Fetched::Tree)),
                ImportKind::Prefetch => fetcher
                    .fetch_prefetch_set(items)
                    .await
                    .map(|r| wrap(r, Fetched::Blob)),
            }
        };

        let err = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(results)) if results.len() == count => return results,
            Ok(Ok(results)) => StoreError::remote(format!(
                "{kind} fetch returned {} results for {count} items",
                results.len()
            )),
            Ok(Err(err)) => err,
            Err(_) => StoreError::remote(format!("{kind} fetch panicked")),
        };

        tracing::warn!(
            worker_id = self.worker_id,
            %kind,
            count,
            ?err,
            "import batch failed"
        );

        vec![Err(err); count]
    }

    fn persist(&self, items: &[FetchItem], results: &[StoreResult<Fetched>]) {
        for (item, result) in items.iter().zip(results.iter()) {
            let res = match result {
                Ok(Fetched::Blob(blob)) => self.local_store.put_blob(blob),
                Ok(Fetched::Tree(tree)) => self.put_tree(item, tree),
                Err(_) => continue,
            };
            if let Err(err) = res {
                tracing::warn!(
                    id = %item.id,
                    path = %item.proxy.path,
                    ?err,
                    "failed to persist imported object"
                );
            }
        }
    }

    /// Persist a tree along with the proxy metadata of its entries, so
    /// that they can be fetched in turn.
    fn put_tree(&self, item: &FetchItem, tree: &Tree) -> StoreResult<()> {
        self.local_store.put_tree(tree)?;
        for entry in tree.entries.iter() {
            self.local_store
                .put_proxy(&entry.id, &item.proxy.child(entry))?;
        }
        Ok(())
    }
}

fn wrap<T>(
    results: Vec<StoreResult<T>>,
    f: fn(T) -> Fetched,
) -> Vec<StoreResult<Fetched>> {
    results.into_iter().map(|r| r.map(f)).collect()
}
