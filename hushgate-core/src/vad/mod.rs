//! Voice activity gating.
//!
//! The `VoiceActivityDetector` trait is the seam the controller gates through;
//! `EnergyGate` (DC-removed RMS against a fixed threshold) is the detector the
//! controller builds from `PipelineConfig`.

pub mod energy;

pub use energy::{has_voice, EnergyGate};

use crate::buffering::chunk::AudioChunk;

/// Whether a given chunk contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The chunk carries energy above the threshold.
    Speech,
    /// The chunk is at or below the threshold, or empty.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

impl From<bool> for VadDecision {
    fn from(voiced: bool) -> Self {
        if voiced {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }
}

/// Trait for gate implementations.
///
/// Detectors are stateless: hysteresis lives in the controller, so classifying
/// the same chunk twice always yields the same decision.
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify a chunk that has already been through conditioning.
    fn classify(&self, chunk: &AudioChunk) -> VadDecision;
}
