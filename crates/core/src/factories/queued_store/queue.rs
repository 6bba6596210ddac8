//! The import request queue.
//!
//! An unbounded, deduplicating queue partitioned by [ImportKind].
//!
//! ### Dedup index
//!
//! Every [ObjectKey] that is queued or being serviced maps to the unique
//! id of its request and the promise slots of everybody waiting for it.
//! A second enqueue of the same key attaches a new slot instead of
//! creating a request. Keys leave the index when the request is
//! completed, not when it is dequeued, so an enqueue that arrives while
//! the fetch is running still attaches to it. Removal and fulfillment
//! happen under the same lock: once a key is gone from the index, the
//! next enqueue for it triggers a fresh fetch.
//!
//! ### Batching
//!
//! Requests are kept in one FIFO per kind. A worker takes up to the
//! configured batch size of requests from a single kind, choosing the
//! kind whose front request is the oldest.
//!
//! ### Shutdown
//!
//! [ImportRequestQueue::shutdown] fails everything still queued, wakes
//! every waiting worker and makes further dequeues return `None`.
//! Requests being serviced are left to their worker, and
//! [ImportRequestQueue::fail_all] finishes and fails whatever is left
//! once the workers are gone. A request is finished exactly once,
//! either by its worker or by `fail_all`, whichever comes first.

use super::import_request::*;
use super::metrics::ImportMetrics;
use crate::trace_bus::TraceBus;
use backstore_api::*;
use futures::future::{join_all, try_join_all};
use std::{
    collections::{hash_map::Entry, HashMap, VecDeque},
    sync::{Arc, Mutex},
};
use tokio::sync::Notify;

/// How the future of a prefetch treats failures of its members.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum PrefetchFailurePolicy {
    /// Wait for every member and succeed regardless, only logging
    /// failures.
    #[default]
    BestEffort,

    /// Wait for every member, then fail with the first failure if any.
    WaitAll,

    /// Fail as soon as any member fails.
    FailFast,
}

#[derive(Debug)]
struct InFlight {
    unique: u64,
    waiters: Vec<Waiter>,
}

#[derive(Debug, Default)]
struct State {
    stopped: bool,
    next_unique: u64,
    queues: [VecDeque<Arc<ImportRequest>>; 3],
    index: HashMap<ObjectKey, InFlight>,
    /// Requests handed to a worker and not yet completed, by unique id.
    in_service: HashMap<u64, Arc<ImportRequest>>,
}

impl State {
    fn next_unique(&mut self) -> u64 {
        self.next_unique += 1;
        self.next_unique
    }

    /// The kind whose front request was queued first.
    fn oldest_kind(&self) -> Option<ImportKind> {
        ImportKind::ALL
            .iter()
            .filter_map(|kind| {
                self.queues[kind.index()]
                    .front()
                    .map(|r| (r.unique, *kind))
            })
            .min()
            .map(|(_, kind)| kind)
    }

    fn take_batch(
        &mut self,
        kind: ImportKind,
        max: usize,
    ) -> Vec<Arc<ImportRequest>> {
        let queue = &mut self.queues[kind.index()];
        let n = queue.len().min(max.max(1));
        let batch: Vec<Arc<ImportRequest>> = queue.drain(..n).collect();
        for request in batch.iter() {
            self.in_service.insert(request.unique, request.clone());
        }
        batch
    }

    fn has_queued(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    /// Remove the index entries of `request`, returning their waiters.
    /// Entries that belong to a different request are left alone.
    fn take_waiters(
        &mut self,
        request: &ImportRequest,
        item: &FetchItem,
    ) -> Vec<Waiter> {
        match self.index.entry(request.key_for(item)) {
            Entry::Occupied(o) if o.get().unique == request.unique => {
                o.remove().waiters
            }
            _ => Vec::new(),
        }
    }
}

/// See the [module docs](self).
#[derive(Debug)]
pub(crate) struct ImportRequestQueue {
    state: Mutex<State>,
    notify: Notify,
    batch_sizes: [usize; 3],
    trace_bus: Arc<TraceBus<ImportTraceEvent>>,
    metrics: Arc<ImportMetrics>,
}

impl ImportRequestQueue {
    /// `batch_sizes` is indexed by [ImportKind::index].
    pub fn new(
        batch_sizes: [usize; 3],
        trace_bus: Arc<TraceBus<ImportTraceEvent>>,
        metrics: Arc<ImportMetrics>,
    ) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            batch_sizes,
            trace_bus,
            metrics,
        }
    }

    pub fn enqueue_blob(
        &self,
        item: FetchItem,
        cause: FetchCause,
    ) -> ImportFuture<Blob> {
        let (waiter, fut) = Waiter::blob();
        self.enqueue(ImportKind::Blob, item, cause, waiter);
        fut
    }

    pub fn enqueue_tree(
        &self,
        item: FetchItem,
        cause: FetchCause,
    ) -> ImportFuture<Tree> {
        let (waiter, fut) = Waiter::tree();
        self.enqueue(ImportKind::Tree, item, cause, waiter);
        fut
    }

    /// Never waits for anything but the queue lock.
    fn enqueue(
        &self,
        kind: ImportKind,
        item: FetchItem,
        cause: FetchCause,
        waiter: Waiter,
    ) {
        let mut lock = self.state.lock().unwrap();

        if lock.stopped {
            drop(lock);
            waiter.fail(StoreError::shutdown("import queue is stopped"));
            return;
        }

        let key = key_for(kind, &item.id);
        if let Some(in_flight) = lock.index.get_mut(&key) {
            tracing::trace!(
                %key,
                unique = in_flight.unique,
                "attaching to in-flight import"
            );
            in_flight.waiters.push(waiter);
            return;
        }

        let unique = lock.next_unique();
        lock.index.insert(
            key,
            InFlight {
                unique,
                waiters: vec![waiter],
            },
        );
        let request = ImportRequest::new(unique, kind, vec![item], cause);
        self.push(&mut lock, request);
        drop(lock);

        self.notify.notify_one();
    }

    /// Enqueue a prefetch of `items`. Items that are already queued or
    /// being serviced are not fetched again, the returned future also
    /// waits for them. The future resolves according to `policy`.
    pub fn enqueue_prefetch(
        &self,
        items: Vec<FetchItem>,
        cause: FetchCause,
        policy: PrefetchFailurePolicy,
    ) -> BoxFut<'static, StoreResult<()>> {
        let mut lock = self.state.lock().unwrap();

        if lock.stopped {
            return Box::pin(async {
                Err(StoreError::shutdown("import queue is stopped"))
            });
        }

        let unique = lock.next_unique();
        let mut futs = Vec::with_capacity(items.len());
        let mut fresh = Vec::new();

        for item in items {
            let (waiter, fut) = Waiter::done();
            futs.push(fut);
            match lock.index.entry(ObjectKey::blob(item.id.clone())) {
                Entry::Occupied(mut o) => o.get_mut().waiters.push(waiter),
                Entry::Vacant(v) => {
                    v.insert(InFlight {
                        unique,
                        waiters: vec![waiter],
                    });
                    fresh.push(item);
                }
            }
        }

        let attached = futs.len() - fresh.len();
        if !fresh.is_empty() {
            let request =
                ImportRequest::new(unique, ImportKind::Prefetch, fresh, cause);
            self.push(&mut lock, request);
            drop(lock);
            self.notify.notify_one();
        }

        tracing::trace!(unique, attached, "prefetch enqueued");

        Box::pin(async move {
            match policy {
                PrefetchFailurePolicy::FailFast => {
                    try_join_all(futs).await.map(|_| ())
                }
                PrefetchFailurePolicy::WaitAll => {
                    join_all(futs).await.into_iter().collect()
                }
                PrefetchFailurePolicy::BestEffort => {
                    let failed = join_all(futs)
                        .await
                        .into_iter()
                        .filter(|r| r.is_err())
                        .count();
                    if failed > 0 {
                        tracing::debug!(
                            failed,
                            "prefetch completed with failures"
                        );
                    }
                    Ok(())
                }
            }
        })
    }

    fn push(&self, state: &mut State, request: ImportRequest) {
        if let Some(item) = request.trace_item() {
            self.trace_bus.publish(ImportTraceEvent::queue(
                request.unique,
                request.kind,
                item,
            ));
        }
        self.metrics.queued(request.kind, request.unique);
        state.queues[request.kind.index()].push_back(Arc::new(request));
    }

    /// Wait for a batch of same-kind requests, taking from the kind
    /// whose front request is the oldest. Returns `None` once the queue
    /// is stopped.
    pub async fn dequeue(&self) -> Option<Vec<Arc<ImportRequest>>> {
        self.dequeue_inner(|state| state.oldest_kind(), None).await
    }

    /// Wait for a batch of up to `max` requests of `kind`. Returns
    /// `None` once the queue is stopped.
    ///
    /// Import workers use [ImportRequestQueue::dequeue]. A wakeup this
    /// method cannot use, because the new request is of another kind,
    /// is handed on to the other dequeuers.
    #[allow(dead_code)]
    pub async fn dequeue_batch(
        &self,
        kind: ImportKind,
        max: usize,
    ) -> Option<Vec<Arc<ImportRequest>>> {
        self.dequeue_inner(
            |state| {
                (!state.queues[kind.index()].is_empty()).then_some(kind)
            },
            Some(max),
        )
        .await
    }

    async fn dequeue_inner<F>(
        &self,
        pick: F,
        max: Option<usize>,
    ) -> Option<Vec<Arc<ImportRequest>>>
    where
        F: Fn(&State) -> Option<ImportKind>,
    {
        let mut woken = false;
        loop {
            if woken {
                let lock = self.state.lock().unwrap();
                let pass_on =
                    !lock.stopped && pick(&lock).is_none() && lock.has_queued();
                drop(lock);
                // Not registered right now, so this cannot wake us.
                if pass_on {
                    self.notify.notify_waiters();
                }
            }

            // Register for a wakeup before checking, so that an enqueue
            // between the check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut lock = self.state.lock().unwrap();

                if lock.stopped {
                    return None;
                }

                if let Some(kind) = pick(&lock) {
                    let max = max.unwrap_or(self.batch_sizes[kind.index()]);
                    let batch = lock.take_batch(kind, max);
                    for request in batch.iter() {
                        self.metrics.started(request.kind, request.unique);
                    }
                    let more = lock.has_queued();
                    drop(lock);

                    // Pass the baton to another worker.
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(batch);
                }
            }

            notified.await;
            woken = true;
        }
    }

    /// Fulfill every interested party of `request`. `results` holds one
    /// result per item of the request, in order.
    pub fn complete(
        &self,
        request: &ImportRequest,
        results: Vec<StoreResult<Fetched>>,
    ) {
        let mut lock = self.state.lock().unwrap();
        // Already finished and failed by fail_all.
        if lock.in_service.remove(&request.unique).is_none() {
            return;
        }
        let mut results = results.into_iter();
        let fulfill: Vec<_> = request
            .items
            .iter()
            .map(|item| {
                let result = results.next().unwrap_or_else(|| {
                    Err(StoreError::other("missing import result for item"))
                });
                (lock.take_waiters(request, item), result)
            })
            .collect();

        // Observers see the request finished no later than its waiters.
        self.finish(request);

        for (waiters, result) in fulfill {
            for waiter in waiters {
                waiter.fulfill(&result);
            }
        }
    }

    fn finish(&self, request: &ImportRequest) {
        if let Some(item) = request.trace_item() {
            self.trace_bus.publish(ImportTraceEvent::finish(
                request.unique,
                request.kind,
                item,
            ));
        }
        self.metrics
            .finished(request.kind, request.unique, request.queued_at);
    }

    /// Stop the queue: fail every queued request with a shutdown error
    /// and wake every waiting worker. Returns the number of requests
    /// failed. Idempotent.
    pub fn shutdown(&self) -> usize {
        let mut lock = self.state.lock().unwrap();
        if lock.stopped {
            return 0;
        }
        lock.stopped = true;

        let queued: Vec<Arc<ImportRequest>> = lock
            .queues
            .iter_mut()
            .flat_map(|q| q.drain(..))
            .collect();

        let err = StoreError::shutdown("import queue stopped");
        for request in queued.iter() {
            let waiters: Vec<Waiter> = request
                .items
                .iter()
                .flat_map(|item| lock.take_waiters(request, item))
                .collect();
            self.finish(request);
            for waiter in waiters {
                waiter.fail(err.clone());
            }
        }
        drop(lock);

        self.notify.notify_waiters();

        queued.len()
    }

    /// Finish every request still being serviced and fail every
    /// remaining interested party, queued or in flight. Returns the
    /// number of keys failed.
    pub fn fail_all(&self, err: StoreError) -> usize {
        let mut lock = self.state.lock().unwrap();
        let index = std::mem::take(&mut lock.index);
        let in_service = std::mem::take(&mut lock.in_service);
        for request in in_service.values() {
            self.finish(request);
        }
        drop(lock);

        let n = index.len();
        for (_, in_flight) in index {
            for waiter in in_flight.waiters {
                waiter.fail(err.clone());
            }
        }
        n
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Number of requests of `kind` waiting for a worker.
    pub fn queued_len(&self, kind: ImportKind) -> usize {
        self.state.lock().unwrap().queues[kind.index()].len()
    }

    /// Number of keys queued or being serviced.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().unwrap().index.len()
    }
}
