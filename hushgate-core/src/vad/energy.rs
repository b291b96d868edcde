//! Energy gate: DC-removed RMS compared against a threshold.
//!
//! RMS is measured in 16-bit sample units after widening to f64, and the
//! comparison is strictly greater-than, so a chunk sitting exactly on the
//! threshold is silence.

use super::{VadDecision, VoiceActivityDetector};
use crate::buffering::chunk::AudioChunk;

/// Returns `true` if the chunk's DC-removed RMS exceeds `threshold`.
///
/// An empty chunk never has voice.
pub fn has_voice(chunk: &AudioChunk, threshold: f32) -> bool {
    if chunk.is_empty() {
        return false;
    }
    chunk.rms() > f64::from(threshold)
}

/// Fixed-threshold energy detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyGate {
    /// RMS threshold in 16-bit sample units. Typical speech sits well above 200,
    /// a quiet room around 10-40.
    threshold: f32,
}

impl EnergyGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self::new(50.0)
    }
}

impl VoiceActivityDetector for EnergyGate {
    fn classify(&self, chunk: &AudioChunk) -> VadDecision {
        has_voice(chunk, self.threshold).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(amplitude: i16, dc: i16, len: usize) -> AudioChunk {
        let samples = (0..len)
            .map(|i| if i % 2 == 0 { dc + amplitude } else { dc - amplitude })
            .collect();
        AudioChunk::new(samples, 16_000)
    }

    #[test]
    fn silence_below_threshold() {
        let gate = EnergyGate::new(50.0);
        assert_eq!(gate.classify(&square(10, 0, 1024)), VadDecision::Silence);
    }

    #[test]
    fn speech_above_threshold() {
        let gate = EnergyGate::new(50.0);
        assert_eq!(gate.classify(&square(800, 0, 1024)), VadDecision::Speech);
    }

    #[test]
    fn threshold_comparison_is_strict() {
        // A ±50 square wave has an RMS of exactly 50.
        assert!(!has_voice(&square(50, 0, 512), 50.0));
        assert!(has_voice(&square(51, 0, 512), 50.0));
    }

    #[test]
    fn dc_offset_alone_is_not_voice() {
        let chunk = AudioChunk::new(vec![5_000; 1024], 16_000);
        assert!(!has_voice(&chunk, 50.0));
        assert!(!has_voice(&square(20, 3_000, 1024), 50.0));
    }

    #[test]
    fn empty_chunk_is_silence() {
        assert!(!has_voice(&AudioChunk::empty(16_000), 0.0));
        assert_eq!(
            EnergyGate::default().classify(&AudioChunk::empty(16_000)),
            VadDecision::Silence
        );
    }

    #[test]
    fn classification_is_repeatable() {
        let gate = EnergyGate::new(50.0);
        let chunk = square(60, 100, 777);
        let first = gate.classify(&chunk);
        assert_eq!(first, gate.classify(&chunk));
        assert!(first.is_speech());
    }
}
