//! # hushgate-core
//!
//! Real-time audio conditioning and voice-activity gating in front of a
//! speech recognizer.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureBackend callback (audio thread)
//!                  │
//!          VoiceActivityController
//!            ├─ ConditioningPipeline: normalize → suppress → resample
//!            ├─ EnergyGate on the conditioned chunk
//!            └─ PreRollBuffer of raw chunks while idle
//!                  │ try_enqueue (never blocks)
//!            Delivery queue {Chunk | EndOfUtterance}
//!                  │ dequeue_blocking (spawn_blocking)
//!            SpeechRecognizer → broadcast::Sender<TranscriptEvent>
//! ```
//!
//! `ListeningEngine` owns the listening state machine and opens and closes
//! capture streams off the control path.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod recognizer;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{CaptureBackend, CpalBackend};
pub use config::{NoiseMode, PipelineConfig};
pub use engine::{controller::VoiceActivityController, EngineConfig, ListeningEngine};
pub use error::GateError;
pub use ipc::events::{
    ListeningStatus, ListeningStatusEvent, SegmentKind, TranscriptEvent, TranscriptSegment,
};
pub use recognizer::{RecognizerHandle, SpeechRecognizer, StubRecognizer};
