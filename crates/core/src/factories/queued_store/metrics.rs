//! Import metrics, partitioned by import kind and pipeline stage.

use backstore_api::ImportKind;
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// The pipeline stage of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStage {
    /// Queued, not yet picked up by a worker.
    Pending,

    /// Being serviced by a worker.
    Live,

    /// Completed (successfully or not).
    Finished,
}

/// What to compute over the imports of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMetric {
    /// Number of imports.
    Count,

    /// Longest duration in microseconds. For pending and live imports
    /// this is the time spent so far in the stage, for finished imports
    /// the total time from queueing to completion.
    MaxDurationUs,

    /// Average duration in microseconds.
    AvgDurationUs,
}

/// Requests currently in a stage, with the instant they entered it.
#[derive(Debug, Default)]
struct WatchList(Mutex<HashMap<u64, Instant>>);

impl WatchList {
    fn start(&self, unique: u64) {
        self.0.lock().unwrap().insert(unique, Instant::now());
    }

    fn stop(&self, unique: u64) -> Option<Duration> {
        self.0.lock().unwrap().remove(&unique).map(|s| s.elapsed())
    }

    fn metric(&self, metric: RequestMetric) -> u64 {
        let lock = self.0.lock().unwrap();
        match metric {
            RequestMetric::Count => lock.len() as u64,
            RequestMetric::MaxDurationUs => lock
                .values()
                .map(|s| s.elapsed().as_micros() as u64)
                .max()
                .unwrap_or(0),
            RequestMetric::AvgDurationUs => {
                if lock.is_empty() {
                    return 0;
                }
                let total: u64 = lock
                    .values()
                    .map(|s| s.elapsed().as_micros() as u64)
                    .sum();
                total / lock.len() as u64
            }
        }
    }
}

const BUCKETS: usize = 40;

/// Latencies bucketed by powers of two microseconds: bucket `i` holds
/// samples in `[2^i, 2^(i+1))`, bucket 0 also holds zero.
#[derive(Debug)]
struct LatencyHistogram {
    buckets: [u64; BUCKETS],
    count: u64,
    sum_us: u64,
    max_us: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: [0; BUCKETS],
            count: 0,
            sum_us: 0,
            max_us: 0,
        }
    }
}

impl LatencyHistogram {
    fn bucket_of(us: u64) -> usize {
        if us == 0 {
            return 0;
        }
        ((63 - us.leading_zeros()) as usize).min(BUCKETS - 1)
    }

    fn record(&mut self, d: Duration) {
        let us = d.as_micros() as u64;
        self.buckets[Self::bucket_of(us)] += 1;
        self.count += 1;
        self.sum_us = self.sum_us.saturating_add(us);
        self.max_us = self.max_us.max(us);
    }

    fn metric(&self, metric: RequestMetric) -> u64 {
        match metric {
            RequestMetric::Count => self.count,
            RequestMetric::MaxDurationUs => self.max_us,
            RequestMetric::AvgDurationUs => {
                if self.count == 0 {
                    0
                } else {
                    self.sum_us / self.count
                }
            }
        }
    }

    /// Upper bound of the bucket holding the `pct` percentile sample,
    /// capped at the observed maximum.
    fn percentile(&self, pct: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let pct = pct.clamp(0.0, 100.0);
        let rank = ((pct / 100.0) * self.count as f64).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (i, n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= rank {
                let upper = (1u64 << (i + 1)) - 1;
                return upper.min(self.max_us);
            }
        }
        self.max_us
    }
}

/// Metrics of every import passing through one queued backing store.
///
/// Each kind/stage pair has its own lock, so workers moving requests
/// of one kind do not contend with readers of another.
#[derive(Debug, Default)]
pub struct ImportMetrics {
    pending: [WatchList; 3],
    live: [WatchList; 3],
    finished: [Mutex<LatencyHistogram>; 3],
}

impl ImportMetrics {
    pub(crate) fn queued(&self, kind: ImportKind, unique: u64) {
        self.pending[kind.index()].start(unique);
    }

    pub(crate) fn started(&self, kind: ImportKind, unique: u64) {
        self.pending[kind.index()].stop(unique);
        self.live[kind.index()].start(unique);
    }

    pub(crate) fn finished(
        &self,
        kind: ImportKind,
        unique: u64,
        queued_at: Instant,
    ) {
        self.pending[kind.index()].stop(unique);
        self.live[kind.index()].stop(unique);
        self.finished[kind.index()]
            .lock()
            .unwrap()
            .record(queued_at.elapsed());
    }

    /// Calculate `metric` for `kind` imports that are in `stage`.
    ///
    /// For example `get(Pending, Blob, Count)` is the number of blob
    /// imports waiting for a worker.
    pub fn get(
        &self,
        stage: RequestStage,
        kind: ImportKind,
        metric: RequestMetric,
    ) -> u64 {
        match stage {
            RequestStage::Pending => self.pending[kind.index()].metric(metric),
            RequestStage::Live => self.live[kind.index()].metric(metric),
            RequestStage::Finished => {
                self.finished[kind.index()].lock().unwrap().metric(metric)
            }
        }
    }

    /// Approximate `pct` percentile of the total latency of finished
    /// `kind` imports, in microseconds.
    pub fn finished_percentile_us(&self, kind: ImportKind, pct: f64) -> u64 {
        self.finished[kind.index()].lock().unwrap().percentile(pct)
    }
}
