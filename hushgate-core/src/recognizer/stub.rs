//! `StubRecognizer`: reports how much audio each utterance carried.
//!
//! Produces a partial `"…"` for every non-trivial chunk and a final
//! `"[stub: <N> samples @ <SR> Hz]"` per utterance, so the whole path from
//! capture to transcript events can be exercised without a model.

use tracing::debug;

use super::SpeechRecognizer;
use crate::buffering::chunk::AudioChunk;
use crate::error::Result;
use crate::ipc::events::{SegmentKind, TranscriptSegment};

#[derive(Debug, Default)]
pub struct StubRecognizer {
    utterance_count: u32,
    samples: usize,
    sample_rate: u32,
}

impl StubRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn utterance_id(&self) -> String {
        format!("stub-{}", self.utterance_count + 1)
    }
}

impl SpeechRecognizer for StubRecognizer {
    fn accept(&mut self, chunk: &AudioChunk) -> Result<Option<TranscriptSegment>> {
        self.samples += chunk.len();
        self.sample_rate = chunk.sample_rate;
        if chunk.len() < 160 {
            return Ok(None);
        }
        Ok(Some(TranscriptSegment {
            id: self.utterance_id(),
            text: "\u{2026}".to_string(),
            kind: SegmentKind::Partial,
            confidence: None,
        }))
    }

    fn finalize(&mut self) -> Result<Option<TranscriptSegment>> {
        if self.samples == 0 {
            return Ok(None);
        }
        let segment = TranscriptSegment {
            id: self.utterance_id(),
            text: format!("[stub: {} samples @ {} Hz]", self.samples, self.sample_rate),
            kind: SegmentKind::Final,
            confidence: Some(1.0),
        };
        self.utterance_count += 1;
        self.samples = 0;
        Ok(Some(segment))
    }

    fn reset(&mut self) {
        debug!(discarded = self.samples, "StubRecognizer::reset");
        self.samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizes_with_sample_count_and_advances_id() {
        let mut rec = StubRecognizer::new();
        let partial = rec
            .accept(&AudioChunk::new(vec![0; 1_024], 16_000))
            .unwrap()
            .unwrap();
        assert_eq!(partial.kind, SegmentKind::Partial);
        assert_eq!(partial.id, "stub-1");
        assert!(rec.accept(&AudioChunk::new(vec![0; 100], 16_000)).unwrap().is_none());

        let last = rec.finalize().unwrap().unwrap();
        assert_eq!(last.kind, SegmentKind::Final);
        assert_eq!(last.text, "[stub: 1124 samples @ 16000 Hz]");
        assert_eq!(last.id, "stub-1");

        assert!(rec.finalize().unwrap().is_none());
        let next = rec
            .accept(&AudioChunk::new(vec![0; 512], 16_000))
            .unwrap()
            .unwrap();
        assert_eq!(next.id, "stub-2");
    }

    #[test]
    fn reset_discards_pending_audio() {
        let mut rec = StubRecognizer::new();
        rec.accept(&AudioChunk::new(vec![0; 512], 16_000)).unwrap();
        rec.reset();
        assert!(rec.finalize().unwrap().is_none());
    }
}
