//! Immutable pipeline configuration.
//!
//! A `PipelineConfig` is validated once, when the voice activity controller is
//! built. Changing any field means building a new controller; nothing here is
//! read back mid-stream.

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// How the noise suppressor estimates the noise it gates out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseMode {
    /// One noise profile per chunk: mean + spread of each frequency bin.
    Stationary,
    /// Noise floor tracked frame by frame, follows slowly changing noise.
    Adaptive,
}

/// Options recognised by the conditioning pipeline and the VAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Enable the level normalizer stage.
    pub normalize: bool,
    /// Normalizer target, as a fraction of full scale in (0, 1].
    pub normalize_target_rms: f32,
    /// Enable the noise suppressor stage.
    pub noise_suppression: bool,
    /// Fraction of gated energy removed, in [0, 1].
    pub noise_strength: f32,
    pub noise_mode: NoiseMode,
    /// Suppressed output must keep more than this share of the input RMS,
    /// otherwise the original chunk is used. In (0, 1].
    pub noise_min_rms_ratio: f32,
    /// Gate threshold in 16-bit sample units (DC-removed RMS).
    pub silence_threshold_rms: f32,
    /// Silent chunks tolerated inside an utterance before it ends.
    pub hysteresis_chunks: u32,
    /// Seconds of audio prepended when speech starts.
    pub pre_roll_seconds: f32,
    /// Rate the capture stream delivers (Hz).
    pub capture_rate: u32,
    /// Rate the recognizer expects (Hz).
    pub target_rate: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalize: false,
            normalize_target_rms: 0.3,
            noise_suppression: true,
            noise_strength: 0.05,
            noise_mode: NoiseMode::Adaptive,
            noise_min_rms_ratio: 0.5,
            silence_threshold_rms: 50.0,
            hysteresis_chunks: 10,
            pre_roll_seconds: 1.0,
            capture_rate: 16_000,
            target_rate: 16_000,
        }
    }
}

impl PipelineConfig {
    /// Reject out-of-range values. Called by every pipeline constructor.
    pub fn validate(&self) -> Result<()> {
        if !(self.normalize_target_rms > 0.0 && self.normalize_target_rms <= 1.0) {
            return Err(invalid(
                "normalize_target_rms",
                "must be in (0, 1]",
                self.normalize_target_rms,
            ));
        }
        if !(0.0..=1.0).contains(&self.noise_strength) {
            return Err(invalid(
                "noise_strength",
                "must be in [0, 1]",
                self.noise_strength,
            ));
        }
        if !(self.noise_min_rms_ratio > 0.0 && self.noise_min_rms_ratio <= 1.0) {
            return Err(invalid(
                "noise_min_rms_ratio",
                "must be in (0, 1]",
                self.noise_min_rms_ratio,
            ));
        }
        if !(self.silence_threshold_rms >= 0.0 && self.silence_threshold_rms.is_finite()) {
            return Err(invalid(
                "silence_threshold_rms",
                "must be a finite value >= 0",
                self.silence_threshold_rms,
            ));
        }
        if !(self.pre_roll_seconds >= 0.0 && self.pre_roll_seconds.is_finite()) {
            return Err(invalid(
                "pre_roll_seconds",
                "must be a finite value >= 0",
                self.pre_roll_seconds,
            ));
        }
        if self.capture_rate == 0 {
            return Err(GateError::Config("capture_rate must be > 0".into()));
        }
        if self.target_rate == 0 {
            return Err(GateError::Config("target_rate must be > 0".into()));
        }
        Ok(())
    }

    /// Number of conditioned samples kept from the pre-roll at speech start.
    pub fn pre_roll_samples(&self) -> usize {
        (f64::from(self.pre_roll_seconds) * f64::from(self.target_rate)).round() as usize
    }

    pub fn needs_resampling(&self) -> bool {
        self.capture_rate != self.target_rate
    }
}

fn invalid(field: &str, rule: &str, value: f32) -> GateError {
    GateError::Config(format!("{field} {rule}, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn rejects_zero_rates() {
        let cfg = PipelineConfig {
            capture_rate: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(GateError::Config(_))));

        let cfg = PipelineConfig {
            target_rate: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(GateError::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_ratios() {
        for ratio in [0.0, -0.1, 1.5, f32::NAN] {
            let cfg = PipelineConfig {
                noise_min_rms_ratio: ratio,
                ..PipelineConfig::default()
            };
            assert!(cfg.validate().is_err(), "ratio {ratio} should be rejected");
        }
    }

    #[test]
    fn rejects_negative_threshold_and_pre_roll() {
        let cfg = PipelineConfig {
            silence_threshold_rms: -1.0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = PipelineConfig {
            pre_roll_seconds: -0.5,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pre_roll_samples_use_target_rate() {
        let cfg = PipelineConfig {
            pre_roll_seconds: 0.5,
            capture_rate: 48_000,
            target_rate: 16_000,
            ..PipelineConfig::default()
        };
        assert_eq!(cfg.pre_roll_samples(), 8_000);
        assert!(cfg.needs_resampling());
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{ "normalize": true, "noise_mode": "stationary" }"#)
                .expect("partial config should deserialize");
        assert!(cfg.normalize);
        assert_eq!(cfg.noise_mode, NoiseMode::Stationary);
        assert_eq!(cfg.hysteresis_chunks, 10);
    }
}
