//! Import lifecycle trace events.

use crate::*;
use std::sync::Arc;

/// The lifecycle stage an [ImportTraceEvent] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportEventType {
    /// The request entered the queue.
    Queue,

    /// A worker picked the request up.
    Start,

    /// Every interested party of the request has been fulfilled.
    Finish,
}

/// A trace event describing one stage of one import request.
#[derive(Debug, Clone)]
pub struct ImportTraceEvent {
    /// Unique per request, but consistent across the three stages of an
    /// import. Used to correlate events to a request.
    pub unique: u64,

    /// Which stage this event reports.
    pub event_type: ImportEventType,

    /// What is being imported.
    pub kind: ImportKind,

    /// The (first) object id of the request.
    pub id: ObjectId,

    /// The repository path of the (first) object, for diagnostics.
    pub path: Arc<str>,

    /// When the event was emitted.
    pub at: std::time::Instant,
}

impl ImportTraceEvent {
    fn new(
        unique: u64,
        event_type: ImportEventType,
        kind: ImportKind,
        item: &FetchItem,
    ) -> Self {
        Self {
            unique,
            event_type,
            kind,
            id: item.id.clone(),
            path: item.proxy.path.as_str().into(),
            at: std::time::Instant::now(),
        }
    }

    /// A request was queued.
    pub fn queue(unique: u64, kind: ImportKind, item: &FetchItem) -> Self {
        Self::new(unique, ImportEventType::Queue, kind, item)
    }

    /// A request was started by a worker.
    pub fn start(unique: u64, kind: ImportKind, item: &FetchItem) -> Self {
        Self::new(unique, ImportEventType::Start, kind, item)
    }

    /// A request was finished.
    pub fn finish(unique: u64, kind: ImportKind, item: &FetchItem) -> Self {
        Self::new(unique, ImportEventType::Finish, kind, item)
    }
}
