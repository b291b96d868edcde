//! Level normalizer: rescale a chunk toward a target RMS.

use crate::buffering::chunk::AudioChunk;

/// Upper bound on the gain applied to any chunk. Keeps near-silence from
/// being blown up into loud noise.
pub const MAX_GAIN: f32 = 50.0;

/// Below this RMS (full-scale units) a chunk is treated as digital silence
/// and returned unchanged.
const SILENCE_FLOOR: f32 = 1e-6;

/// Remove DC, then scale so the chunk's RMS approaches `target_rms`
/// (fraction of full scale). Gain is capped at [`MAX_GAIN`] and the result
/// saturates to the i16 range.
pub fn normalize(chunk: &AudioChunk, target_rms: f32) -> AudioChunk {
    if chunk.is_empty() {
        return chunk.clone();
    }

    let mut samples = chunk.to_f32();
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    for s in samples.iter_mut() {
        *s -= mean;
    }

    let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
    if rms < SILENCE_FLOOR {
        return chunk.clone();
    }

    let gain = (target_rms / rms).min(MAX_GAIN);
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
    AudioChunk::from_f32(&samples, chunk.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(amplitude: f32, len: usize) -> AudioChunk {
        let samples = (0..len)
            .map(|i| (amplitude * (i as f32 * 0.05).sin()) as i16)
            .collect();
        AudioChunk::new(samples, 16_000)
    }

    #[test]
    fn quiet_speech_is_raised_to_target() {
        let out = normalize(&sine(1_000.0, 4_096), 0.3);
        assert_relative_eq!(out.rms(), 0.3 * 32_768.0, max_relative = 0.01);
        assert_eq!(out.sample_rate, 16_000);
    }

    #[test]
    fn gain_is_capped() {
        let input = sine(10.0, 4_096);
        let out = normalize(&input, 0.3);
        assert_relative_eq!(out.rms(), input.rms() * f64::from(MAX_GAIN), max_relative = 0.02);
    }

    #[test]
    fn digital_silence_passes_through_unchanged() {
        let zeros = AudioChunk::new(vec![0; 512], 16_000);
        assert_eq!(normalize(&zeros, 0.3), zeros);

        let dc_only = AudioChunk::new(vec![1_234; 512], 16_000);
        assert_eq!(normalize(&dc_only, 0.3), dc_only);

        let empty = AudioChunk::empty(16_000);
        assert_eq!(normalize(&empty, 0.3), empty);
    }

    #[test]
    fn output_saturates_instead_of_wrapping() {
        let samples = (0..256)
            .map(|i| if i % 2 == 0 { 30_000 } else { -30_000 })
            .collect();
        let out = normalize(&AudioChunk::new(samples, 16_000), 1.0);
        assert!(out.samples.iter().all(|&s| s == 32_767 || s == -32_768));
    }

    #[test]
    fn removes_dc_offset() {
        let samples = (0..1_024)
            .map(|i| 5_000 + if i % 2 == 0 { 400 } else { -400 })
            .collect();
        let out = normalize(&AudioChunk::new(samples, 16_000), 0.3);
        let mean = out.samples.iter().map(|&s| f64::from(s)).sum::<f64>() / out.len() as f64;
        assert!(mean.abs() < 1.0, "mean={mean}");
    }
}
