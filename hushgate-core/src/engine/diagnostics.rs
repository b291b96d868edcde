//! Read-only counters shared between the capture callback, the consumer loop
//! and whoever wants to observe them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineDiagnostics {
    /// Raw chunks handed to the controller.
    pub chunks_in: AtomicUsize,
    /// Conditioned chunks emitted (pre-roll prefixes count as one).
    pub chunks_emitted: AtomicUsize,
    /// Items the delivery queue refused because it was full.
    pub queue_dropped: AtomicUsize,
    /// Noise suppressor results thrown away by the RMS safety check.
    pub suppression_reverted: AtomicUsize,
    /// Conditioning stages that failed and passed their input through.
    pub stage_faults: AtomicUsize,
    /// End-of-utterance markers produced, forced ones included.
    pub utterances: AtomicUsize,
    pub recognizer_errors: AtomicUsize,
    pub in_speech: AtomicBool,
}

impl PipelineDiagnostics {
    pub fn in_speech(&self) -> bool {
        self.in_speech.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_in: self.chunks_in.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            suppression_reverted: self.suppression_reverted.load(Ordering::Relaxed),
            stage_faults: self.stage_faults.load(Ordering::Relaxed),
            utterances: self.utterances.load(Ordering::Relaxed),
            recognizer_errors: self.recognizer_errors.load(Ordering::Relaxed),
            in_speech: self.in_speech(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_in: usize,
    pub chunks_emitted: usize,
    pub queue_dropped: usize,
    pub suppression_reverted: usize,
    pub stage_faults: usize,
    pub utterances: usize,
    pub recognizer_errors: usize,
    pub in_speech: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_every_counter() {
        let diag = PipelineDiagnostics::default();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());

        diag.chunks_in.fetch_add(3, Ordering::Relaxed);
        diag.queue_dropped.fetch_add(2, Ordering::Relaxed);
        diag.in_speech.store(true, Ordering::Release);
        let snap = diag.snapshot();
        assert_eq!(snap.chunks_in, 3);
        assert_eq!(snap.queue_dropped, 2);
        assert!(snap.in_speech);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snap = DiagnosticsSnapshot {
            queue_dropped: 4,
            ..DiagnosticsSnapshot::default()
        };
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["queueDropped"], 4);
        assert_eq!(json["inSpeech"], false);
    }
}
