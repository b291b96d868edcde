//! Voice activity controller (VAC).
//!
//! Invoked once per raw capture chunk, on the capture callback thread, and
//! owned by it exclusively:
//!
//! ```text
//! raw ──► conditioning ──► gate ─┬─ idle + silence   → buffer raw in pre-roll, emit nothing
//!                                ├─ idle + voice     → emit conditioned pre-roll, then chunk
//!                                ├─ speech + voice   → emit chunk, reset silence counter
//!                                ├─ speech + silence → emit chunk while counter ≤ hysteresis
//!                                └─ otherwise        → end of utterance, emit nothing
//! ```
//!
//! The gate always sees conditioned audio so normalization can lift quiet
//! speech over the threshold. The pre-roll keeps raw audio and conditions it
//! only at speech start, through a detached copy of the pipeline.

use std::sync::{atomic::Ordering, Arc};

use tracing::{debug, info, trace, warn};

use crate::audio::conditioning::ConditioningPipeline;
use crate::audio::recorder::WavTap;
use crate::buffering::{chunk::AudioChunk, pre_roll::PreRollBuffer};
use crate::config::PipelineConfig;
use crate::engine::diagnostics::PipelineDiagnostics;
use crate::error::Result;
use crate::vad::{EnergyGate, VoiceActivityDetector};

pub struct VoiceActivityController {
    pipeline: ConditioningPipeline,
    gate: EnergyGate,
    pre_roll: PreRollBuffer,
    /// Conditioned samples kept from the pre-roll at speech start.
    pre_roll_samples: usize,
    hysteresis_chunks: u32,
    target_rate: u32,
    in_speech: bool,
    consecutive_silent_chunks: u32,
    speech_just_ended: bool,
    diagnostics: Arc<PipelineDiagnostics>,
    tap: Option<WavTap>,
}

impl VoiceActivityController {
    /// Build a controller. `block_size` is the capture chunk size, used as the
    /// resampler's input block.
    ///
    /// # Errors
    /// Any configuration error, before audio flows.
    pub fn new(
        config: &PipelineConfig,
        block_size: usize,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Result<Self> {
        let pipeline = ConditioningPipeline::new(config, block_size, Arc::clone(&diagnostics))?;
        info!(
            stages = ?pipeline.stage_names(),
            threshold = config.silence_threshold_rms,
            hysteresis = config.hysteresis_chunks,
            pre_roll_seconds = config.pre_roll_seconds,
            capture_rate = config.capture_rate,
            target_rate = config.target_rate,
            "voice activity controller ready"
        );
        Ok(Self {
            pipeline,
            gate: EnergyGate::new(config.silence_threshold_rms),
            pre_roll: PreRollBuffer::new(),
            pre_roll_samples: config.pre_roll_samples(),
            hysteresis_chunks: config.hysteresis_chunks,
            target_rate: config.target_rate,
            in_speech: false,
            consecutive_silent_chunks: 0,
            speech_just_ended: false,
            diagnostics,
            tap: None,
        })
    }

    /// Also write every emitted chunk to `tap`.
    pub fn with_tap(mut self, tap: WavTap) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Process one raw capture-rate chunk, returning the conditioned chunks
    /// to deliver, in order. Check [`take_speech_end`](Self::take_speech_end)
    /// afterwards for the end-of-utterance signal.
    pub fn process(&mut self, raw: &AudioChunk) -> Vec<AudioChunk> {
        self.diagnostics.chunks_in.fetch_add(1, Ordering::Relaxed);

        let conditioned = self.pipeline.process(raw);
        let voiced = self.gate.classify(&conditioned).is_speech();
        trace!(rms = conditioned.rms(), voiced, in_speech = self.in_speech, "chunk gated");

        let mut out = Vec::with_capacity(2);
        match (self.in_speech, voiced) {
            (false, false) => self.pre_roll.push(raw.clone()),
            (false, true) => {
                if let Some(prefix) = self.conditioned_pre_roll() {
                    out.push(prefix);
                }
                self.set_in_speech(true);
                self.consecutive_silent_chunks = 0;
                out.push(conditioned);
            }
            (true, true) => {
                self.consecutive_silent_chunks = 0;
                out.push(conditioned);
            }
            (true, false) => {
                self.consecutive_silent_chunks += 1;
                if self.consecutive_silent_chunks <= self.hysteresis_chunks {
                    out.push(conditioned);
                } else {
                    self.end_speech();
                }
            }
        }

        if !out.is_empty() {
            self.diagnostics
                .chunks_emitted
                .fetch_add(out.len(), Ordering::Relaxed);
            self.write_tap(&out);
        }
        out
    }

    /// True once after each utterance ends; reading it clears it.
    pub fn take_speech_end(&mut self) -> bool {
        std::mem::take(&mut self.speech_just_ended)
    }

    /// End the current utterance without waiting for silence. Returns whether
    /// one was open.
    pub fn force_end(&mut self) -> bool {
        if !self.in_speech {
            return false;
        }
        self.end_speech();
        true
    }

    /// Conditioned audio still held by the pipeline (the resampler's partial
    /// block), for when the input ends mid-utterance. Call before
    /// [`force_end`](Self::force_end). `None` outside speech or when nothing
    /// is pending.
    pub fn drain_tail(&mut self) -> Option<AudioChunk> {
        if !self.in_speech {
            return None;
        }
        let tail = self.pipeline.flush();
        if tail.is_empty() {
            return None;
        }
        self.diagnostics.chunks_emitted.fetch_add(1, Ordering::Relaxed);
        self.write_tap(std::slice::from_ref(&tail));
        Some(tail)
    }

    /// Back to idle with an empty pre-roll, discarding any open utterance.
    pub fn reset(&mut self) {
        self.set_in_speech(false);
        self.consecutive_silent_chunks = 0;
        self.speech_just_ended = false;
        self.pre_roll.clear();
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn buffered_pre_roll_chunks(&self) -> usize {
        self.pre_roll.len()
    }

    /// Finalize the WAV tap, if any.
    pub fn finish(&mut self) -> Result<()> {
        match self.tap.as_mut() {
            Some(tap) => tap.finish(),
            None => Ok(()),
        }
    }

    fn end_speech(&mut self) {
        self.set_in_speech(false);
        self.consecutive_silent_chunks = 0;
        self.speech_just_ended = true;
        self.pre_roll.clear();
        self.diagnostics.utterances.fetch_add(1, Ordering::Relaxed);
        info!("speech ended");
    }

    fn set_in_speech(&mut self, in_speech: bool) {
        self.in_speech = in_speech;
        self.diagnostics.in_speech.store(in_speech, Ordering::Release);
    }

    /// Condition the buffered raw chunks and keep the most recent
    /// `pre_roll_samples` of the result. Empties the pre-roll.
    fn conditioned_pre_roll(&mut self) -> Option<AudioChunk> {
        let buffered = self.pre_roll.drain_and_clear();
        if buffered.is_empty() || self.pre_roll_samples == 0 {
            info!("speech started");
            return None;
        }

        let mut detached = match self.pipeline.detached() {
            Ok(p) => p,
            Err(e) => {
                warn!("pre-roll conditioning unavailable, starting without it: {e}");
                self.diagnostics.stage_faults.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let mut samples: Vec<i16> = Vec::new();
        for raw in &buffered {
            samples.extend_from_slice(&detached.process(raw).samples);
        }
        samples.extend_from_slice(&detached.flush().samples);

        let start = samples.len().saturating_sub(self.pre_roll_samples);
        let kept = samples.split_off(start);
        info!(
            buffered_chunks = buffered.len(),
            pre_roll_samples = kept.len(),
            "speech started"
        );
        (!kept.is_empty()).then(|| AudioChunk::new(kept, self.target_rate))
    }

    fn write_tap(&mut self, chunks: &[AudioChunk]) {
        let Some(tap) = self.tap.as_mut() else {
            return;
        };
        for chunk in chunks {
            if let Err(e) = tap.write(chunk) {
                warn!("disabling recording after write failure: {e}");
                self.tap = None;
                return;
            }
        }
        debug!(samples = tap.samples_written(), "recorded emitted audio");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 1_024;

    /// ±`rms` square wave around `dc`; its DC-removed RMS is exactly `rms`.
    fn square(rms: i16, dc: i16) -> AudioChunk {
        let samples = (0..BLOCK)
            .map(|i| if i % 2 == 0 { dc + rms } else { dc - rms })
            .collect();
        AudioChunk::new(samples, 16_000)
    }

    fn config(hysteresis: u32, pre_roll_seconds: f32) -> PipelineConfig {
        PipelineConfig {
            normalize: false,
            noise_suppression: false,
            silence_threshold_rms: 50.0,
            hysteresis_chunks: hysteresis,
            pre_roll_seconds,
            ..PipelineConfig::default()
        }
    }

    fn controller(cfg: &PipelineConfig) -> (VoiceActivityController, Arc<PipelineDiagnostics>) {
        let diag = Arc::new(PipelineDiagnostics::default());
        let vac = VoiceActivityController::new(cfg, BLOCK, Arc::clone(&diag)).unwrap();
        (vac, diag)
    }

    #[test]
    fn silence_is_buffered_not_emitted() {
        let (mut vac, diag) = controller(&config(10, 1.0));
        for _ in 0..5 {
            assert!(vac.process(&square(10, 0)).is_empty());
        }
        assert_eq!(vac.buffered_pre_roll_chunks(), 5);
        assert!(!vac.in_speech());
        assert!(!vac.take_speech_end());
        assert_eq!(diag.snapshot().chunks_in, 5);
        assert_eq!(diag.snapshot().chunks_emitted, 0);
    }

    #[test]
    fn speech_start_prepends_most_recent_pre_roll_in_order() {
        // Two chunks' worth of pre-roll at 16 kHz.
        let (mut vac, diag) = controller(&config(10, 2.0 * BLOCK as f32 / 16_000.0));
        for marker in 1..=4 {
            vac.process(&square(10, marker * 100));
        }

        let out = vac.process(&square(800, 0));
        assert_eq!(out.len(), 2);
        let prefix = &out[0];
        assert_eq!(prefix.len(), 2 * BLOCK);
        assert_eq!(prefix.samples[0], 300 + 10);
        assert_eq!(prefix.samples[BLOCK], 400 + 10);
        assert_eq!(out[1], square(800, 0));

        assert!(vac.in_speech());
        assert!(diag.in_speech());
        assert_eq!(vac.buffered_pre_roll_chunks(), 0);
    }

    #[test]
    fn zero_pre_roll_emits_only_the_current_chunk() {
        let (mut vac, _) = controller(&config(10, 0.0));
        vac.process(&square(10, 0));
        let out = vac.process(&square(800, 0));
        assert_eq!(out, vec![square(800, 0)]);
        assert_eq!(vac.buffered_pre_roll_chunks(), 0);
    }

    #[test]
    fn hysteresis_tolerates_exactly_h_silent_chunks() {
        let (mut vac, diag) = controller(&config(3, 0.0));
        vac.process(&square(800, 0));

        for _ in 0..3 {
            assert_eq!(vac.process(&square(10, 0)).len(), 1);
            assert!(!vac.take_speech_end());
        }
        assert!(vac.process(&square(10, 0)).is_empty());
        assert!(vac.take_speech_end());
        assert!(!vac.take_speech_end(), "flag clears on read");
        assert!(!vac.in_speech());
        assert!(!diag.in_speech());
        assert_eq!(diag.snapshot().utterances, 1);

        // The chunk that ended speech is not buffered either.
        assert_eq!(vac.buffered_pre_roll_chunks(), 0);
        vac.process(&square(10, 0));
        assert_eq!(vac.buffered_pre_roll_chunks(), 1);
    }

    #[test]
    fn voice_during_hysteresis_resets_the_counter() {
        let (mut vac, _) = controller(&config(2, 0.0));
        vac.process(&square(800, 0));
        vac.process(&square(10, 0));
        vac.process(&square(10, 0));
        vac.process(&square(800, 0));
        assert_eq!(vac.process(&square(10, 0)).len(), 1);
        assert_eq!(vac.process(&square(10, 0)).len(), 1);
        assert!(!vac.take_speech_end());
        assert!(vac.process(&square(10, 0)).is_empty());
        assert!(vac.take_speech_end());
    }

    #[test]
    fn zero_hysteresis_ends_on_first_silent_chunk() {
        let (mut vac, _) = controller(&config(0, 0.0));
        assert_eq!(vac.process(&square(800, 0)).len(), 1);
        assert!(vac.process(&square(10, 0)).is_empty());
        assert!(vac.take_speech_end());
    }

    #[test]
    fn empty_chunks_never_start_speech() {
        let (mut vac, _) = controller(&config(10, 1.0));
        for _ in 0..20 {
            assert!(vac.process(&AudioChunk::empty(16_000)).is_empty());
        }
        assert!(!vac.in_speech());
        assert_eq!(vac.buffered_pre_roll_chunks(), 0);
    }

    #[test]
    fn force_end_and_reset() {
        let (mut vac, diag) = controller(&config(10, 1.0));
        assert!(!vac.force_end());

        vac.process(&square(800, 0));
        assert!(vac.force_end());
        assert!(vac.take_speech_end());
        assert_eq!(diag.snapshot().utterances, 1);

        vac.process(&square(10, 0));
        vac.process(&square(800, 0));
        vac.reset();
        assert!(!vac.in_speech());
        assert!(!vac.take_speech_end());
        assert_eq!(vac.buffered_pre_roll_chunks(), 0);
    }

    #[test]
    fn resampled_output_carries_target_rate() {
        let cfg = PipelineConfig {
            capture_rate: 48_000,
            target_rate: 16_000,
            ..config(10, 0.5)
        };
        let (mut vac, _) = controller(&cfg);
        let loud = AudioChunk::new(
            (0..BLOCK)
                .map(|i| (4_000.0 * (i as f32 * 0.05).sin()) as i16)
                .collect(),
            48_000,
        );
        let mut emitted = Vec::new();
        for _ in 0..4 {
            emitted.extend(vac.process(&loud));
        }
        assert!(!emitted.is_empty());
        assert!(emitted.iter().all(|c| c.sample_rate == 16_000));
    }

    #[test]
    fn drain_tail_returns_the_partial_resampler_block() {
        let cfg = PipelineConfig {
            capture_rate: 48_000,
            target_rate: 16_000,
            ..config(10, 0.0)
        };
        let (mut vac, diag) = controller(&cfg);
        assert!(vac.drain_tail().is_none());

        let wave = |len: usize| {
            AudioChunk::new(
                (0..len)
                    .map(|i| (4_000.0 * (i as f32 * 0.05).sin()) as i16)
                    .collect(),
                48_000,
            )
        };
        for _ in 0..4 {
            vac.process(&wave(BLOCK));
        }
        assert!(vac.in_speech());

        // A short final block stays inside the resampler.
        assert!(vac.process(&wave(300)).is_empty());
        let emitted = diag.chunks_emitted.load(Ordering::Relaxed);

        let tail = vac.drain_tail().expect("pending tail");
        assert_eq!(tail.sample_rate, 16_000);
        assert_eq!(tail.len(), 100);
        assert_eq!(diag.chunks_emitted.load(Ordering::Relaxed), emitted + 1);
        assert!(vac.drain_tail().is_none());
        assert!(vac.force_end());
    }

    #[test]
    fn tap_records_every_emitted_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vac.wav");
        let (vac, _) = controller(&config(1, 0.0));
        let mut vac = vac.with_tap(WavTap::create(&path, 16_000).unwrap());

        vac.process(&square(10, 0));
        vac.process(&square(800, 0));
        vac.process(&square(10, 0));
        vac.process(&square(10, 0));
        vac.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration() as usize, 2 * BLOCK);
    }
}
