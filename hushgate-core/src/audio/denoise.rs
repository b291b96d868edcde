//! Noise suppressor: an STFT spectral gate wrapped in a level safety check.
//!
//! ## Model
//!
//! The chunk is split into 512-sample Hann frames with a 128-sample hop. Each
//! frequency bin is compared against a noise estimate; bins judged to be noise
//! are attenuated by `strength` (0 = untouched, 1 = removed), then the frames
//! are overlap-added back together.
//!
//! - `Stationary`: one threshold per bin for the whole chunk, mean + 1.5 std of
//!   the bin's level in dB.
//! - `Adaptive`: a per-bin noise floor smoothed over time; bins under twice the
//!   floor are gated.
//!
//! ## Safety check
//!
//! Suppression that removes too much signal is worse than none. The result is
//! kept only if its RMS stays above `min_rms_ratio` of the input RMS and does
//! not exceed it; non-finite output is a stage fault. In both failure cases
//! the original chunk is returned unchanged.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::{debug, warn};

use crate::buffering::chunk::AudioChunk;
use crate::config::{NoiseMode, PipelineConfig};

pub const FRAME_LEN: usize = 512;
pub const HOP: usize = 128;
const BINS: usize = FRAME_LEN / 2 + 1;

const STATIONARY_STD_MULT: f32 = 1.5;
const ADAPTIVE_FLOOR_MULT: f32 = 2.0;
const ADAPTIVE_SMOOTHING: f32 = 0.9;

/// What the suppressor did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionOutcome {
    /// Suppressed audio passed the safety check and was returned.
    Applied,
    /// Suppressed audio failed the RMS check; the original was returned.
    Reverted,
    /// Suppression produced non-finite samples; the original was returned.
    Faulted,
    /// Nothing to do (zero strength, digital silence, or shorter than a frame).
    Skipped,
}

#[derive(Clone)]
pub struct NoiseSuppressor {
    strength: f32,
    mode: NoiseMode,
    min_rms_ratio: f32,
    window: Arc<[f32]>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl NoiseSuppressor {
    pub fn new(strength: f32, mode: NoiseMode, min_rms_ratio: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            strength: strength.clamp(0.0, 1.0),
            mode,
            min_rms_ratio,
            window: build_hann_window(FRAME_LEN).into(),
            forward: planner.plan_fft_forward(FRAME_LEN),
            inverse: planner.plan_fft_inverse(FRAME_LEN),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.noise_strength,
            config.noise_mode,
            config.noise_min_rms_ratio,
        )
    }

    pub fn mode(&self) -> NoiseMode {
        self.mode
    }

    pub fn strength(&self) -> f32 {
        self.strength
    }

    /// Suppress noise in `chunk`, falling back to the input when the result
    /// fails the safety check.
    pub fn suppress(&self, chunk: &AudioChunk) -> (AudioChunk, SuppressionOutcome) {
        if self.strength <= 0.0 || chunk.len() < FRAME_LEN || chunk.rms() <= 0.0 {
            return (chunk.clone(), SuppressionOutcome::Skipped);
        }
        let gated = self.spectral_gate(&chunk.to_f32());
        self.vet(chunk, &gated)
    }

    /// Apply the safety check to a suppressed signal.
    fn vet(&self, original: &AudioChunk, gated: &[f32]) -> (AudioChunk, SuppressionOutcome) {
        if gated.len() != original.len() || gated.iter().any(|s| !s.is_finite()) {
            warn!(
                len = original.len(),
                "noise suppressor produced invalid output; passing chunk through"
            );
            return (original.clone(), SuppressionOutcome::Faulted);
        }

        let candidate = AudioChunk::from_f32(gated, original.sample_rate);
        let rms_before = original.rms();
        let rms_after = candidate.rms();
        let floor = rms_before * f64::from(self.min_rms_ratio);

        if rms_after > floor && rms_after <= rms_before {
            (candidate, SuppressionOutcome::Applied)
        } else {
            debug!(
                rms_before,
                rms_after,
                min_ratio = self.min_rms_ratio,
                "noise suppression reverted"
            );
            (original.clone(), SuppressionOutcome::Reverted)
        }
    }

    fn spectral_gate(&self, samples: &[f32]) -> Vec<f32> {
        let n = samples.len();
        let pad = FRAME_LEN - HOP;
        let mut total = n + 2 * pad;
        let rem = (total - FRAME_LEN) % HOP;
        if rem != 0 {
            total += HOP - rem;
        }
        let mut padded = vec![0.0f32; total];
        padded[pad..pad + n].copy_from_slice(samples);
        let n_frames = (total - FRAME_LEN) / HOP + 1;

        let mut spectra: Vec<Vec<Complex<f32>>> = (0..n_frames)
            .map(|frame| {
                let start = frame * HOP;
                let mut buf: Vec<Complex<f32>> = padded[start..start + FRAME_LEN]
                    .iter()
                    .zip(self.window.iter())
                    .map(|(&s, &w)| Complex::new(s * w, 0.0))
                    .collect();
                self.forward.process(&mut buf);
                buf
            })
            .collect();

        let mags: Vec<Vec<f32>> = spectra
            .iter()
            .map(|spec| spec[..BINS].iter().map(|c| c.norm()).collect())
            .collect();
        let gains = match self.mode {
            NoiseMode::Stationary => stationary_gains(&mags, self.strength),
            NoiseMode::Adaptive => adaptive_gains(&mags, self.strength),
        };

        let mut out = vec![0.0f32; total];
        let mut weight = vec![0.0f32; total];
        let scale = 1.0 / FRAME_LEN as f32;
        for (frame, (spec, gain)) in spectra.iter_mut().zip(gains.iter()).enumerate() {
            for k in 0..BINS {
                spec[k] *= gain[k];
            }
            // Mirror onto the negative frequencies so the inverse stays real.
            for k in 1..FRAME_LEN / 2 {
                spec[FRAME_LEN - k] *= gain[k];
            }
            self.inverse.process(spec);

            let start = frame * HOP;
            for (i, &w) in self.window.iter().enumerate() {
                out[start + i] += spec[i].re * scale * w;
                weight[start + i] += w * w;
            }
        }

        out[pad..pad + n]
            .iter()
            .zip(&weight[pad..pad + n])
            .map(|(&o, &w)| if w > 1e-6 { o / w } else { 0.0 })
            .collect()
    }
}

fn stationary_gains(mags: &[Vec<f32>], strength: f32) -> Vec<Vec<f32>> {
    let frames = mags.len() as f32;
    let thresholds: Vec<f32> = (0..BINS)
        .map(|k| {
            let mean = mags.iter().map(|m| to_db(m[k])).sum::<f32>() / frames;
            let var = mags
                .iter()
                .map(|m| (to_db(m[k]) - mean).powi(2))
                .sum::<f32>()
                / frames;
            mean + STATIONARY_STD_MULT * var.sqrt()
        })
        .collect();

    mags.iter()
        .map(|m| {
            m.iter()
                .zip(&thresholds)
                .map(|(&mag, &t)| if to_db(mag) > t { 1.0 } else { 1.0 - strength })
                .collect()
        })
        .collect()
}

fn adaptive_gains(mags: &[Vec<f32>], strength: f32) -> Vec<Vec<f32>> {
    let frames = mags.len() as f32;
    let mut floor: Vec<f32> = (0..BINS)
        .map(|k| mags.iter().map(|m| m[k]).sum::<f32>() / frames)
        .collect();

    mags.iter()
        .map(|m| {
            let gains = m
                .iter()
                .zip(&floor)
                .map(|(&mag, &fl)| {
                    if mag > ADAPTIVE_FLOOR_MULT * fl {
                        1.0
                    } else {
                        1.0 - strength
                    }
                })
                .collect();
            for (fl, &mag) in floor.iter_mut().zip(m) {
                *fl = ADAPTIVE_SMOOTHING * *fl + (1.0 - ADAPTIVE_SMOOTHING) * mag;
            }
            gains
        })
        .collect()
}

#[inline]
fn to_db(mag: f32) -> f32 {
    20.0 * mag.max(1e-6).log10()
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn white_noise(seed: u64, amplitude: i16, len: usize) -> AudioChunk {
        let mut rng = StdRng::seed_from_u64(seed);
        let samples = (0..len)
            .map(|_| rng.gen_range(-amplitude..=amplitude))
            .collect();
        AudioChunk::new(samples, 16_000)
    }

    #[test]
    fn attenuates_noise_in_both_modes() {
        for mode in [NoiseMode::Stationary, NoiseMode::Adaptive] {
            let input = white_noise(7, 3_000, 4_096);
            let suppressor = NoiseSuppressor::new(0.5, mode, 0.1);
            let (out, outcome) = suppressor.suppress(&input);
            assert_eq!(outcome, SuppressionOutcome::Applied, "mode {mode:?}");
            assert_eq!(out.len(), input.len());
            assert!(
                out.rms() < input.rms() * 0.9,
                "mode {mode:?}: {} vs {}",
                out.rms(),
                input.rms()
            );
        }
    }

    #[test]
    fn full_ratio_always_returns_original() {
        for mode in [NoiseMode::Stationary, NoiseMode::Adaptive] {
            for strength in [0.05, 0.5, 1.0] {
                let input = white_noise(11, 2_000, 2_048);
                let (out, outcome) = NoiseSuppressor::new(strength, mode, 1.0).suppress(&input);
                assert_eq!(out, input);
                assert_eq!(outcome, SuppressionOutcome::Reverted);
            }
        }
    }

    #[test]
    fn zero_strength_is_a_no_op() {
        let input = white_noise(3, 1_000, 1_024);
        let (out, outcome) = NoiseSuppressor::new(0.0, NoiseMode::Adaptive, 0.5).suppress(&input);
        assert_eq!(out, input);
        assert_eq!(outcome, SuppressionOutcome::Skipped);
    }

    #[test]
    fn short_and_silent_chunks_pass_through() {
        let suppressor = NoiseSuppressor::new(0.5, NoiseMode::Stationary, 0.5);

        let short = white_noise(5, 1_000, FRAME_LEN - 1);
        assert_eq!(suppressor.suppress(&short), (short.clone(), SuppressionOutcome::Skipped));

        let silent = AudioChunk::new(vec![0; 2_048], 16_000);
        assert_eq!(
            suppressor.suppress(&silent),
            (silent.clone(), SuppressionOutcome::Skipped)
        );
    }

    #[test]
    fn non_finite_output_is_a_fault() {
        let suppressor = NoiseSuppressor::new(0.5, NoiseMode::Stationary, 0.5);
        let input = white_noise(9, 1_000, 8);
        let mut gated = input.to_f32();
        gated[3] = f32::NAN;
        let (out, outcome) = suppressor.vet(&input, &gated);
        assert_eq!(out, input);
        assert_eq!(outcome, SuppressionOutcome::Faulted);
    }

    #[test]
    fn louder_output_is_rejected() {
        let suppressor = NoiseSuppressor::new(0.5, NoiseMode::Stationary, 0.5);
        let input = white_noise(13, 1_000, 64);
        let louder: Vec<f32> = input.to_f32().iter().map(|s| s * 1.5).collect();
        let (out, outcome) = suppressor.vet(&input, &louder);
        assert_eq!(out, input);
        assert_eq!(outcome, SuppressionOutcome::Reverted);
    }

    #[test]
    fn ratio_floor_is_exclusive() {
        let suppressor = NoiseSuppressor::new(0.5, NoiseMode::Stationary, 0.5);
        let input = AudioChunk::new(
            (0..64).map(|i| if i % 2 == 0 { 1_000 } else { -1_000 }).collect(),
            16_000,
        );
        let scaled = |gain: f32| -> Vec<f32> { input.to_f32().iter().map(|s| s * gain).collect() };

        let (out, outcome) = suppressor.vet(&input, &scaled(0.5));
        assert_eq!(out, input);
        assert_eq!(outcome, SuppressionOutcome::Reverted);

        let (out, outcome) = suppressor.vet(&input, &scaled(0.75));
        assert_eq!(outcome, SuppressionOutcome::Applied);
        assert_eq!(out.samples[0], 750);
    }
}
