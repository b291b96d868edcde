//! Pre-roll ring of raw chunks captured while nobody is speaking.
//!
//! The ring stores *unconditioned* capture-rate chunks; they are conditioned
//! only when speech starts. Capacity is a fixed chunk count, independent of
//! the configured pre-roll duration: the VAC trims the conditioned audio to
//! the requested length afterwards.

use ringbuf::{
    traits::{Consumer, Observer, RingBuffer},
    HeapRb,
};

use super::chunk::AudioChunk;

/// Maximum number of raw chunks retained (≈ 12.8 s of 1024-sample blocks at 16 kHz).
pub const PRE_ROLL_CAPACITY: usize = 200;

pub struct PreRollBuffer {
    ring: HeapRb<AudioChunk>,
}

impl PreRollBuffer {
    pub fn new() -> Self {
        Self::with_capacity(PRE_ROLL_CAPACITY)
    }

    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity),
        }
    }

    /// Append a raw chunk, dropping the oldest one when full. Empty chunks are ignored.
    pub fn push(&mut self, raw: AudioChunk) {
        if raw.is_empty() {
            return;
        }
        self.ring.push_overwrite(raw);
    }

    /// Remove and return every buffered chunk, oldest first.
    pub fn drain_and_clear(&mut self) -> Vec<AudioChunk> {
        self.ring.pop_iter().collect()
    }

    /// Discard buffered chunks without returning them.
    pub fn clear(&mut self) {
        self.ring.clear();
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Total raw samples currently held.
    pub fn buffered_samples(&self) -> usize {
        self.ring.iter().map(AudioChunk::len).sum()
    }
}

impl Default for PreRollBuffer {
    fn default() -> Self {
        Self::new()
    }
}
