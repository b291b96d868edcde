//! Bounded hand-off from the capture callback to the consumer loop.
//!
//! The producer side runs on the audio callback thread and must never wait:
//! `try_enqueue` drops the item being offered when the queue is full and bumps
//! the shared drop counter. The consumer waits with a timeout so it can notice
//! shutdown.

use std::cell::Cell;
use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use super::chunk::AudioChunk;
use crate::engine::diagnostics::PipelineDiagnostics;

/// Default queue depth, in entries.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// What travels through the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryItem {
    /// Conditioned audio at the target rate.
    Chunk(AudioChunk),
    /// The utterance that the preceding chunks belong to is complete.
    EndOfUtterance,
}

/// Create a producer/consumer pair sharing a bounded channel of `capacity` entries.
///
/// Drops are counted on `diagnostics.queue_dropped`.
pub fn delivery_queue(
    capacity: usize,
    diagnostics: Arc<PipelineDiagnostics>,
) -> (DeliveryProducer, DeliveryConsumer) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        DeliveryProducer { tx, diagnostics },
        DeliveryConsumer {
            rx,
            closed: Cell::new(false),
        },
    )
}

/// Producer half. Cloneable; the capture callback holds one clone and the
/// session teardown holds another for the forced end-of-utterance.
#[derive(Clone)]
pub struct DeliveryProducer {
    tx: Sender<DeliveryItem>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl DeliveryProducer {
    /// Offer an item without blocking. Returns `false` if it was dropped.
    pub fn try_enqueue(&self, item: DeliveryItem) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) => {
                let dropped = self
                    .diagnostics
                    .queue_dropped
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if dropped == 1 || dropped % 50 == 0 {
                    warn!(
                        dropped,
                        end_of_utterance = matches!(item, DeliveryItem::EndOfUtterance),
                        "delivery queue full, consumer is not keeping up"
                    );
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("delivery queue consumer gone; item discarded");
                false
            }
        }
    }

    /// Enqueue, waiting up to `timeout` for room. Only for use off the
    /// capture callback (session teardown).
    pub fn enqueue_timeout(&self, item: DeliveryItem, timeout: Duration) -> bool {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                self.diagnostics.queue_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(?timeout, "delivery queue stayed full during teardown");
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

/// Consumer half, owned by a single consumer thread.
pub struct DeliveryConsumer {
    rx: Receiver<DeliveryItem>,
    closed: Cell<bool>,
}

impl DeliveryConsumer {
    /// Wait up to `timeout` for the next item.
    ///
    /// Returns `None` on timeout, or once every producer has been dropped and
    /// the queue is empty; `is_closed` tells the two apart.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Option<DeliveryItem> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.closed.set(true);
                None
            }
        }
    }

    /// Take whatever is queued right now without waiting.
    pub fn drain_ready(&self) -> Vec<DeliveryItem> {
        self.rx.try_iter().collect()
    }

    /// True once every producer is gone and all items were taken.
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
