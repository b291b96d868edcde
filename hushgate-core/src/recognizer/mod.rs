//! Recognizer port.
//!
//! The consumer loop feeds conditioned chunks to a `SpeechRecognizer` and
//! asks it to finalize at every end-of-utterance marker. Real engines (Vosk,
//! Whisper, ...) live outside this crate; `StubRecognizer` keeps the loop
//! testable without one.
//!
//! Recognizers are stateful, so every call goes through `RecognizerHandle`'s
//! `parking_lot::Mutex`.

pub mod stub;

pub use stub::StubRecognizer;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffering::chunk::AudioChunk;
use crate::error::Result;
use crate::ipc::events::TranscriptSegment;

/// Contract for speech recognition backends.
pub trait SpeechRecognizer: Send + 'static {
    /// Feed a conditioned chunk at the target rate. May return a partial
    /// hypothesis, or a final one if the backend detected an endpoint itself.
    fn accept(&mut self, chunk: &AudioChunk) -> Result<Option<TranscriptSegment>>;

    /// The utterance is over: return the committed text, if any, and get
    /// ready for the next one.
    fn finalize(&mut self) -> Result<Option<TranscriptSegment>>;

    /// Drop any partial state without producing output.
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `SpeechRecognizer` implementor.
#[derive(Clone)]
pub struct RecognizerHandle(pub Arc<Mutex<dyn SpeechRecognizer>>);

impl RecognizerHandle {
    pub fn new<R: SpeechRecognizer>(recognizer: R) -> Self {
        Self(Arc::new(Mutex::new(recognizer)))
    }
}

impl std::fmt::Debug for RecognizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerHandle").finish_non_exhaustive()
    }
}
