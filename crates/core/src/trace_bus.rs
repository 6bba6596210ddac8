//! A lossy multi-producer / multi-consumer broadcast bus for trace events.
//!
//! Producers never wait on subscribers. Each subscriber has a bounded
//! buffer; a subscriber that falls behind loses the oldest events it
//! has not seen yet and is told how many it missed. Events published
//! while nobody is subscribed are lost.

use std::sync::Mutex;
use tokio::sync::broadcast;

/// The default number of events buffered per subscriber.
pub const DEFAULT_TRACE_BUS_CAPACITY: usize = 1024;

/// A broadcast bus of trace events of type `E`.
#[derive(Debug)]
pub struct TraceBus<E: Clone + Send + 'static> {
    tx: Mutex<Option<broadcast::Sender<E>>>,
}

impl<E: Clone + Send + 'static> Default for TraceBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_BUS_CAPACITY)
    }
}

impl<E: Clone + Send + 'static> TraceBus<E> {
    /// Construct a new bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Never blocks. A no-op once the bus is closed.
    pub fn publish(&self, event: E) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            // An error only means there are no subscribers right now.
            let _ = tx.send(event);
        }
    }

    /// Subscribe to every event published from now on.
    ///
    /// Subscribing to a closed bus yields a subscription that is
    /// already finished.
    pub fn subscribe(&self) -> TraceSubscription<E> {
        let rx = match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (_, rx) = broadcast::channel(1);
                rx
            }
        };
        TraceSubscription { rx, missed: 0 }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Close the bus. Subscribers receive whatever is still buffered and
    /// then see the end of the stream. Idempotent.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    /// True once [TraceBus::close] was called.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }
}

/// A handle receiving the events of a [TraceBus] in publication order.
///
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct TraceSubscription<E: Clone + Send + 'static> {
    rx: broadcast::Receiver<E>,
    missed: u64,
}

impl<E: Clone + Send + 'static> TraceSubscription<E> {
    /// Wait for the next event. Returns `None` once the bus is closed
    /// and every buffered event has been received.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::trace!(missed = n, "trace subscriber lagged");
                    self.missed += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive the next event if one is buffered.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.missed += n;
                }
                Err(_) => return None,
            }
        }
    }

    /// Total number of events this subscriber lost by falling behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}
