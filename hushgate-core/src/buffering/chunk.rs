//! Typed audio chunk passed between capture, conditioning and the consumer.

/// A contiguous block of signed 16-bit mono samples at a known sample rate.
///
/// Stages never mutate a chunk they were handed; each one returns a new
/// chunk, so a raw chunk kept for pre-roll stays raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    /// Sample rate in Hz. Raw chunks carry the capture rate, emitted chunks
    /// the target rate.
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// DC-removed RMS in 16-bit sample units.
    pub fn rms(&self) -> f64 {
        dc_removed_rms(&self.samples)
    }

    /// Samples widened to f32 in [-1.0, 1.0).
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| i16_to_f32(s)).collect()
    }

    /// Build a chunk from f32 samples, saturating to the i16 range.
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(samples.iter().map(|&s| f32_to_i16(s)).collect(), sample_rate)
    }
}

/// Root-mean-square after subtracting the mean. Empty input yields 0.
pub fn dc_removed_rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| f64::from(s)).sum::<f64>() / n;
    let sum_sq = samples
        .iter()
        .map(|&s| {
            let centered = f64::from(s) - mean;
            centered * centered
        })
        .sum::<f64>();
    (sum_sq / n).sqrt()
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Symmetric scaling; NaN maps to 0 and overflow saturates.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}
