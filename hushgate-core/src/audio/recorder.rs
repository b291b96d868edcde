//! WAV tap: a copy of every conditioned chunk the controller emits, written
//! as 16-bit mono PCM at the target rate. Not a pipeline stage; audio flows
//! past it unchanged.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{info, warn};

use crate::buffering::chunk::AudioChunk;
use crate::error::Result;

pub struct WavTap {
    path: PathBuf,
    sample_rate: u32,
    writer: Option<WavWriter<BufWriter<File>>>,
    samples_written: u64,
}

impl WavTap {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec)?;
        info!(path = %path.display(), sample_rate, "recording conditioned audio");
        Ok(Self {
            path,
            sample_rate,
            writer: Some(writer),
            samples_written: 0,
        })
    }

    /// Append a chunk. Chunks at any other rate than the tap's are skipped.
    pub fn write(&mut self, chunk: &AudioChunk) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if chunk.sample_rate != self.sample_rate {
            warn!(
                expected = self.sample_rate,
                got = chunk.sample_rate,
                "wav tap skipped chunk with mismatched rate"
            );
            return Ok(());
        }
        let mut samples = writer.get_i16_writer(chunk.len() as u32);
        for &s in &chunk.samples {
            samples.write_sample(s);
        }
        samples.flush()?;
        self.samples_written += chunk.len() as u64;
        Ok(())
    }

    /// Finalize the header and close the file. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(
                path = %self.path.display(),
                samples = self.samples_written,
                "recording finalized"
            );
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl Drop for WavTap {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("failed to finalize recording: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_mono_16_bit_at_target_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tap.wav");

        let mut tap = WavTap::create(&path, 16_000).unwrap();
        tap.write(&AudioChunk::new(vec![1, -2, 3], 16_000)).unwrap();
        tap.write(&AudioChunk::new(vec![99; 10], 48_000)).unwrap();
        tap.write(&AudioChunk::new(vec![4], 16_000)).unwrap();
        assert_eq!(tap.samples_written(), 4);
        tap.finish().unwrap();
        tap.finish().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -2, 3, 4]);
    }

    #[test]
    fn drop_finalizes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.wav");
        {
            let mut tap = WavTap::create(&path, 8_000).unwrap();
            tap.write(&AudioChunk::new(vec![7; 80], 8_000)).unwrap();
        }
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 80);
    }
}
