//! Consumer loop: delivery queue → recognizer → transcript events.
//!
//! Runs in `spawn_blocking`, one per listening session. It exits once every
//! producer of its queue is gone and the queue has been drained, so the
//! forced end-of-utterance enqueued at stop is always seen.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn};

use crate::buffering::queue::{DeliveryConsumer, DeliveryItem};
use crate::engine::diagnostics::PipelineDiagnostics;
use crate::error::Result;
use crate::ipc::events::{TranscriptEvent, TranscriptSegment};
use crate::recognizer::RecognizerHandle;

/// All context the consumer needs, passed as one struct so the closure stays tidy.
pub struct ConsumerContext {
    pub queue: DeliveryConsumer,
    pub recognizer: RecognizerHandle,
    pub transcript_tx: broadcast::Sender<TranscriptEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
    pub poll_timeout: Duration,
}

/// What a consumer run saw, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSummary {
    pub chunks: usize,
    pub utterances: usize,
    pub events: usize,
}

pub fn run(ctx: ConsumerContext) -> ConsumerSummary {
    let _span = info_span!("consumer").entered();
    let ConsumerContext {
        queue,
        recognizer,
        transcript_tx,
        seq,
        diagnostics,
        poll_timeout,
    } = ctx;

    let mut summary = ConsumerSummary::default();
    let mut open_utterance = false;

    loop {
        let result = match queue.dequeue_blocking(poll_timeout) {
            Some(DeliveryItem::Chunk(chunk)) => {
                summary.chunks += 1;
                open_utterance = true;
                recognizer.0.lock().accept(&chunk)
            }
            Some(DeliveryItem::EndOfUtterance) => {
                summary.utterances += 1;
                open_utterance = false;
                debug!("end of utterance");
                recognizer.0.lock().finalize()
            }
            None if queue.is_closed() => break,
            None => continue,
        };
        if publish(result, &transcript_tx, &seq, &diagnostics) {
            summary.events += 1;
        }
    }

    if open_utterance {
        // Producers vanished mid-utterance without a marker; nothing will finish it.
        recognizer.0.lock().reset();
    }
    info!(
        chunks = summary.chunks,
        utterances = summary.utterances,
        events = summary.events,
        "consumer finished"
    );
    summary
}

fn publish(
    result: Result<Option<TranscriptSegment>>,
    transcript_tx: &broadcast::Sender<TranscriptEvent>,
    seq: &AtomicU64,
    diagnostics: &PipelineDiagnostics,
) -> bool {
    match result {
        Ok(Some(segment)) => {
            let event = TranscriptEvent {
                seq: seq.fetch_add(1, Ordering::Relaxed),
                segments: vec![segment],
            };
            // No subscribers is fine.
            let _ = transcript_tx.send(event);
            true
        }
        Ok(None) => false,
        Err(e) => {
            diagnostics.recognizer_errors.fetch_add(1, Ordering::Relaxed);
            warn!("recognizer error: {e}");
            false
        }
    }
}
