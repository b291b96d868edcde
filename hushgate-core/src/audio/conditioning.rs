//! Conditioning pipeline: Normalize → Suppress → Resample, in that order.
//!
//! The stage list is built once from `PipelineConfig`; disabled stages are
//! simply absent. Each stage takes a chunk and returns a new one. A stage
//! that fails passes audio through (or, for the resampler, yields nothing)
//! and bumps a diagnostic counter instead of surfacing an error.

use std::sync::{atomic::Ordering, Arc};

use tracing::error;

use super::{
    denoise::{NoiseSuppressor, SuppressionOutcome},
    normalize::normalize,
    resample::RateConverter,
};
use crate::buffering::chunk::AudioChunk;
use crate::config::PipelineConfig;
use crate::engine::diagnostics::PipelineDiagnostics;
use crate::error::Result;

/// One optional conditioning step.
pub enum Stage {
    Normalize { target_rms: f32 },
    Suppress(NoiseSuppressor),
    Resample(RateConverter),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Normalize { .. } => "normalize",
            Stage::Suppress(_) => "suppress",
            Stage::Resample(_) => "resample",
        }
    }
}

pub struct ConditioningPipeline {
    stages: Vec<Stage>,
    target_rate: u32,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl ConditioningPipeline {
    /// Build the stage list. `block_size` is the resampler's input block.
    ///
    /// # Errors
    /// Configuration errors, or a resampler that cannot be built for the
    /// requested rates.
    pub fn new(
        config: &PipelineConfig,
        block_size: usize,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Result<Self> {
        config.validate()?;

        let mut stages = Vec::with_capacity(3);
        if config.normalize {
            stages.push(Stage::Normalize {
                target_rms: config.normalize_target_rms,
            });
        }
        if config.noise_suppression && config.noise_strength > 0.0 {
            stages.push(Stage::Suppress(NoiseSuppressor::from_config(config)));
        }
        if config.needs_resampling() {
            stages.push(Stage::Resample(RateConverter::new(
                config.capture_rate,
                config.target_rate,
                block_size,
            )?));
        }

        Ok(Self {
            stages,
            target_rate: config.target_rate,
            diagnostics,
        })
    }

    /// Copy of this pipeline whose resampler starts with no history, for
    /// conditioning buffered audio without touching the live stream's state.
    pub fn detached(&self) -> Result<Self> {
        let stages = self
            .stages
            .iter()
            .map(|stage| {
                Ok(match stage {
                    Stage::Normalize { target_rms } => Stage::Normalize {
                        target_rms: *target_rms,
                    },
                    Stage::Suppress(s) => Stage::Suppress(s.clone()),
                    Stage::Resample(r) => Stage::Resample(r.fresh()?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            stages,
            target_rate: self.target_rate,
            diagnostics: Arc::clone(&self.diagnostics),
        })
    }

    /// Run a raw capture-rate chunk through every enabled stage.
    pub fn process(&mut self, raw: &AudioChunk) -> AudioChunk {
        let mut current = raw.clone();
        for stage in self.stages.iter_mut() {
            current = match stage {
                Stage::Normalize { target_rms } => normalize(&current, *target_rms),
                Stage::Suppress(suppressor) => {
                    let (out, outcome) = suppressor.suppress(&current);
                    match outcome {
                        SuppressionOutcome::Reverted => {
                            self.diagnostics
                                .suppression_reverted
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        SuppressionOutcome::Faulted => {
                            self.diagnostics.stage_faults.fetch_add(1, Ordering::Relaxed);
                        }
                        SuppressionOutcome::Applied | SuppressionOutcome::Skipped => {}
                    }
                    out
                }
                Stage::Resample(converter) => match converter.process(&current) {
                    Ok(out) => out,
                    Err(e) => {
                        error!("resample stage failed: {e}");
                        self.diagnostics.stage_faults.fetch_add(1, Ordering::Relaxed);
                        AudioChunk::empty(self.target_rate)
                    }
                },
            };
        }
        current
    }

    /// Drain audio still held inside the resampler.
    pub fn flush(&mut self) -> AudioChunk {
        for stage in self.stages.iter_mut() {
            if let Stage::Resample(converter) = stage {
                return converter.flush().unwrap_or_else(|e| {
                    error!("resample flush failed: {e}");
                    self.diagnostics.stage_faults.fetch_add(1, Ordering::Relaxed);
                    AudioChunk::empty(self.target_rate)
                });
            }
        }
        AudioChunk::empty(self.target_rate)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            normalize: false,
            noise_suppression: false,
            ..PipelineConfig::default()
        }
    }

    fn tone(len: usize, rate: u32) -> AudioChunk {
        let samples = (0..len)
            .map(|i| (800.0 * (i as f32 * 0.2).sin()) as i16)
            .collect();
        AudioChunk::new(samples, rate)
    }

    #[test]
    fn disabled_stages_make_an_identity_pipeline() {
        let diag = Arc::new(PipelineDiagnostics::default());
        let mut pipeline = ConditioningPipeline::new(&config(), 1_024, diag).unwrap();
        assert!(pipeline.is_identity());
        let input = tone(1_024, 16_000);
        assert_eq!(pipeline.process(&input), input);
    }

    #[test]
    fn stages_run_in_fixed_order() {
        let cfg = PipelineConfig {
            normalize: true,
            noise_suppression: true,
            capture_rate: 48_000,
            target_rate: 16_000,
            ..PipelineConfig::default()
        };
        let diag = Arc::new(PipelineDiagnostics::default());
        let pipeline = ConditioningPipeline::new(&cfg, 1_024, diag).unwrap();
        assert_eq!(pipeline.stage_names(), vec!["normalize", "suppress", "resample"]);
    }

    #[test]
    fn zero_strength_omits_the_suppressor() {
        let cfg = PipelineConfig {
            noise_suppression: true,
            noise_strength: 0.0,
            ..config()
        };
        let diag = Arc::new(PipelineDiagnostics::default());
        let pipeline = ConditioningPipeline::new(&cfg, 1_024, diag).unwrap();
        assert!(pipeline.is_identity());
    }

    #[test]
    fn reverted_suppression_is_counted() {
        let cfg = PipelineConfig {
            noise_suppression: true,
            noise_strength: 0.5,
            noise_min_rms_ratio: 1.0,
            ..config()
        };
        let diag = Arc::new(PipelineDiagnostics::default());
        let mut pipeline = ConditioningPipeline::new(&cfg, 1_024, Arc::clone(&diag)).unwrap();
        let input = tone(2_048, 16_000);
        assert_eq!(pipeline.process(&input), input);
        assert_eq!(diag.snapshot().suppression_reverted, 1);
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let cfg = PipelineConfig {
            target_rate: 0,
            ..config()
        };
        let diag = Arc::new(PipelineDiagnostics::default());
        assert!(ConditioningPipeline::new(&cfg, 1_024, diag).is_err());
    }

    #[test]
    fn detached_copy_leaves_live_resampler_alone() {
        let cfg = PipelineConfig {
            capture_rate: 48_000,
            target_rate: 16_000,
            ..config()
        };
        let diag = Arc::new(PipelineDiagnostics::default());
        let mut live = ConditioningPipeline::new(&cfg, 1_024, diag).unwrap();
        let first = live.process(&tone(1_024, 48_000));
        assert_eq!(first.sample_rate, 16_000);

        let mut copy = live.detached().unwrap();
        copy.process(&tone(700, 48_000));
        let tail = copy.flush();
        assert!(!tail.is_empty());

        // The live converter has nothing pending of its own.
        assert!(live.flush().is_empty());
    }
}
