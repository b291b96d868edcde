use std::time::Duration;

use thiserror::Error;

/// All errors produced by hushgate-core.
///
/// Only `Config` is fatal by convention: it is raised while building a
/// pipeline, before any audio flows. Everything else is recoverable and a
/// fresh `start` may be retried.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("audio stream did not open within {timeout:?}")]
    StreamStartTimeout { timeout: Duration },

    #[error("resampler error: {0}")]
    Resampler(String),

    #[error("recording error: {0}")]
    Recorder(#[from] hound::Error),

    #[error("recognizer error: {0}")]
    Recognizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GateError {
    /// Whether a later `start` has a reasonable chance of succeeding.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GateError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
