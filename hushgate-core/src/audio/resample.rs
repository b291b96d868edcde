//! Streaming sample-rate conversion using a rubato `SincFixedIn` resampler.
//!
//! ## Design
//!
//! Capture devices often run at 44.1 or 48 kHz while the recognizer wants
//! 16 kHz. `RateConverter` keeps one rubato session alive for the whole
//! listening session so filter state carries across chunk boundaries.
//!
//! When capture rate == target rate no rubato session is created and
//! `process` returns its input sample-for-sample.
//!
//! Input is accumulated until a full `chunk_size` block is available; the
//! remainder waits for the next call. `flush` drains the remainder at the end
//! of a batch.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::info;

use crate::buffering::chunk::{i16_to_f32, AudioChunk};
use crate::error::{GateError, Result};

/// Converts i16 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    capture_rate: u32,
    target_rate: u32,
    /// Input frame count per rubato call.
    chunk_size: usize,
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<SincFixedIn<f32>>,
    /// Holds partial input between calls.
    input_buf: Vec<f32>,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// Returns `GateError::Config` for zero rates or chunk size and
    /// `GateError::Resampler` if rubato rejects the ratio.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(GateError::Config(format!(
                "rate converter needs non-zero rates and chunk size \
                 (capture={capture_rate}, target={target_rate}, chunk={chunk_size})"
            )));
        }

        if capture_rate == target_rate {
            return Ok(Self {
                capture_rate,
                target_rate,
                chunk_size,
                resampler: None,
                input_buf: Vec::new(),
                output_buf: Vec::new(),
            });
        }

        let ratio = f64::from(target_rate) / f64::from(capture_rate);
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, 1)
            .map_err(|e| GateError::Resampler(format!("init {capture_rate}->{target_rate}: {e}")))?;

        let max_out = resampler.output_frames_max();
        info!(
            capture_rate,
            target_rate, chunk_size, max_out, "resampling enabled"
        );

        Ok(Self {
            capture_rate,
            target_rate,
            chunk_size,
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// A converter with the same rates and chunk size but no history.
    pub fn fresh(&self) -> Result<Self> {
        Self::new(self.capture_rate, self.target_rate, self.chunk_size)
    }

    /// Push a capture-rate chunk, returning whatever target-rate audio is
    /// ready (possibly empty).
    pub fn process(&mut self, chunk: &AudioChunk) -> Result<AudioChunk> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(AudioChunk::new(chunk.samples.clone(), self.target_rate));
        };

        self.input_buf
            .extend(chunk.samples.iter().map(|&s| i16_to_f32(s)));

        let mut produced_all = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let (_, produced) = resampler
                .process_into_buffer(&[&self.input_buf[..self.chunk_size]], &mut self.output_buf, None)
                .map_err(|e| GateError::Resampler(e.to_string()))?;
            produced_all.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.drain(..self.chunk_size);
        }

        Ok(AudioChunk::from_f32(&produced_all, self.target_rate))
    }

    /// Resample any buffered partial input, zero-padded, trimmed to the
    /// length the partial input corresponds to.
    pub fn flush(&mut self) -> Result<AudioChunk> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(AudioChunk::empty(self.target_rate));
        };
        if self.input_buf.is_empty() {
            return Ok(AudioChunk::empty(self.target_rate));
        }

        let pending = std::mem::take(&mut self.input_buf);
        let wave_in: [&[f32]; 1] = [pending.as_slice()];
        let (_, produced) = resampler
            .process_partial_into_buffer(Some(&wave_in[..]), &mut self.output_buf, None)
            .map_err(|e| GateError::Resampler(e.to_string()))?;

        let expected = (pending.len() as f64 * f64::from(self.target_rate)
            / f64::from(self.capture_rate))
        .round() as usize;
        let keep = produced.min(expected);
        Ok(AudioChunk::from_f32(&self.output_buf[0][..keep], self.target_rate))
    }

    /// Returns `true` when capture rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Input samples waiting for a full block.
    pub fn pending_samples(&self) -> usize {
        self.input_buf.len()
    }
}
