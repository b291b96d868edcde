//! Audio capture and conditioning.
//!
//! # Capture
//!
//! `CaptureBackend` opens an input stream and calls a sink with fixed-size
//! mono i16 chunks from the audio thread. The sink must return quickly: it
//! runs the voice activity controller and tries to enqueue, nothing more.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so `CaptureStream` is not `Send` either. The listening engine opens
//! and drops the stream on one dedicated worker thread.

pub mod conditioning;
pub mod denoise;
pub mod device;
pub mod normalize;
pub mod recorder;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use parking_lot::Mutex;
#[cfg(feature = "audio-cpal")]
use std::sync::Arc;
#[cfg(feature = "audio-cpal")]
use tracing::{error, info};

use crate::{
    buffering::chunk::{f32_to_i16, AudioChunk},
    error::{GateError, Result},
};
#[cfg(feature = "audio-cpal")]
use device::DeviceSelector;

/// Called from the audio thread with each full block.
pub type ChunkSink = Box<dyn FnMut(AudioChunk) + Send + 'static>;

/// Parameters for opening a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Index or name fragment; `None` for the default input.
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Samples per chunk handed to the sink.
    pub block_size: usize,
}

/// Handle to an open stream. Dropping it stops capture.
pub trait CaptureStream {
    fn sample_rate(&self) -> u32;
    fn device_name(&self) -> &str;
    /// Error the audio subsystem reported since the last call, if any.
    fn take_error(&self) -> Option<GateError>;
}

/// Something that can open capture streams.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Native rate of the device `device` resolves to.
    fn default_sample_rate(&self, device: Option<&str>) -> Result<u32>;

    /// Open a stream and start delivering chunks to `sink`.
    fn open(&self, request: &CaptureRequest, sink: ChunkSink) -> Result<Box<dyn CaptureStream>>;
}

/// Collects arbitrary callback buffers into chunks of exactly `block_size`.
pub struct Reblocker {
    block: Vec<i16>,
    block_size: usize,
    sample_rate: u32,
}

impl Reblocker {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block: Vec::with_capacity(block_size),
            block_size,
            sample_rate,
        }
    }

    pub fn push(&mut self, samples: impl IntoIterator<Item = i16>, emit: &mut impl FnMut(AudioChunk)) {
        for sample in samples {
            self.block.push(sample);
            if self.block.len() == self.block_size {
                let full = std::mem::replace(&mut self.block, Vec::with_capacity(self.block_size));
                emit(AudioChunk::new(full, self.sample_rate));
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.block.len()
    }
}

/// Average interleaved frames down to mono i16.
pub fn downmix<'a, T: Copy + 'a>(
    data: &'a [T],
    channels: usize,
    to_f32: impl Fn(T) -> f32 + 'a,
) -> impl Iterator<Item = i16> + 'a {
    data.chunks_exact(channels.max(1)).map(move |frame| {
        let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
        f32_to_i16(sum / frame.len() as f32)
    })
}

/// Default backend: the host's audio subsystem through cpal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

#[cfg(feature = "audio-cpal")]
struct CpalStream {
    /// Kept alive so the stream is not dropped prematurely.
    _stream: Stream,
    sample_rate: u32,
    device_name: String,
    error_slot: Arc<Mutex<Option<String>>>,
}

#[cfg(feature = "audio-cpal")]
impl CaptureStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn take_error(&self) -> Option<GateError> {
        self.error_slot.lock().take().map(GateError::AudioStream)
    }
}

#[cfg(feature = "audio-cpal")]
fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U8 => Some(2),
        _ => None,
    }
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    block_size: usize,
    mut sink: ChunkSink,
    error_slot: Arc<Mutex<Option<String>>>,
    to_f32: F,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    F: Fn(T) -> f32 + Copy + Send + 'static,
{
    let channels = config.channels as usize;
    let mut reblocker = Reblocker::new(block_size, config.sample_rate.0);
    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            reblocker.push(downmix(data, channels, to_f32), &mut sink);
        },
        move |err| {
            error!("audio stream error: {err}");
            *error_slot.lock() = Some(err.to_string());
        },
        None,
    )
}

#[cfg(feature = "audio-cpal")]
impl CaptureBackend for CpalBackend {
    fn default_sample_rate(&self, device: Option<&str>) -> Result<u32> {
        let host = cpal::default_host();
        let device = device::resolve_input_device(&host, &DeviceSelector::parse(device))?;
        let config = device
            .default_input_config()
            .map_err(|e| GateError::AudioDevice(e.to_string()))?;
        Ok(config.sample_rate().0)
    }

    fn open(&self, request: &CaptureRequest, sink: ChunkSink) -> Result<Box<dyn CaptureStream>> {
        let host = cpal::default_host();
        let device = device::resolve_input_device(&host, &DeviceSelector::parse(request.device.as_deref()))?;
        let device_name = device.name().unwrap_or_default();

        let rate = SampleRate(request.sample_rate);
        let supported = device
            .supported_input_configs()
            .map_err(|e| GateError::AudioDevice(e.to_string()))?
            .filter(|range| range.min_sample_rate().0 <= rate.0 && rate.0 <= range.max_sample_rate().0)
            .filter_map(|range| format_rank(range.sample_format()).map(|rank| (rank, range)))
            .min_by_key(|(rank, range)| (range.channels(), *rank))
            .map(|(_, range)| range.with_sample_rate(rate))
            .ok_or_else(|| {
                GateError::AudioStream(format!(
                    "device '{device_name}' cannot capture at {} Hz",
                    request.sample_rate
                ))
            })?;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            device = %device_name,
            sample_rate = rate.0,
            channels = config.channels,
            format = ?supported.sample_format(),
            block_size = request.block_size,
            "opening input stream"
        );

        let error_slot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&error_slot);
        let block = request.block_size;
        let stream = match supported.sample_format() {
            SampleFormat::I16 => {
                build_stream::<i16, _>(&device, &config, block, sink, slot, |s| s as f32 / 32768.0)
            }
            SampleFormat::F32 => build_stream::<f32, _>(&device, &config, block, sink, slot, |s| s),
            SampleFormat::U8 => build_stream::<u8, _>(&device, &config, block, sink, slot, |s| {
                (s as f32 - 128.0) / 128.0
            }),
            fmt => {
                return Err(GateError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| GateError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| GateError::AudioStream(e.to_string()))?;

        Ok(Box::new(CpalStream {
            _stream: stream,
            sample_rate: rate.0,
            device_name,
            error_slot,
        }))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl CaptureBackend for CpalBackend {
    fn default_sample_rate(&self, _device: Option<&str>) -> Result<u32> {
        Err(GateError::AudioDevice(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn open(&self, _request: &CaptureRequest, _sink: ChunkSink) -> Result<Box<dyn CaptureStream>> {
        Err(GateError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reblocks_into_fixed_chunks() {
        let mut reblocker = Reblocker::new(4, 16_000);
        let mut out = Vec::new();
        reblocker.push(1..=3, &mut |c| out.push(c));
        assert!(out.is_empty());
        reblocker.push(4..=10, &mut |c| out.push(c));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].samples, vec![1, 2, 3, 4]);
        assert_eq!(out[1].samples, vec![5, 6, 7, 8]);
        assert!(out.iter().all(|c| c.sample_rate == 16_000));
        assert_eq!(reblocker.pending(), 2);
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = [0.5f32, -0.5, 0.25, 0.25, 1.0, 1.0];
        let mono: Vec<i16> = downmix(&stereo, 2, |s| s).collect();
        assert_eq!(mono, vec![0, 8_192, 32_767]);
    }

    #[test]
    fn downmix_mono_i16_is_lossless() {
        let samples = [-32_768i16, -1, 0, 1, 32_767];
        let mono: Vec<i16> = downmix(&samples, 1, |s| s as f32 / 32768.0).collect();
        assert_eq!(mono, samples.to_vec());
    }
}
