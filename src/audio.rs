//! PCM16 sample container and the fixed-cadence chunk framing math.

use crate::error::{PalabraError, Result};

/// An immutable container of interleaved signed 16-bit PCM samples plus
/// the metadata needed to interpret them. `AudioFrame`s move through
/// queues by value; no frame is ever mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<i16>,
    sample_rate: u32,
    num_channels: u16,
}

impl AudioFrame {
    /// Build a frame from interleaved samples, rejecting a sample count
    /// that doesn't divide evenly across channels.
    pub fn new(pcm: Vec<i16>, sample_rate: u32, num_channels: u16) -> Result<Self> {
        if num_channels == 0 {
            return Err(PalabraError::Configuration(
                "AudioFrame num_channels must be >= 1".into(),
            ));
        }
        if pcm.len() % num_channels as usize != 0 {
            return Err(PalabraError::Configuration(format!(
                "AudioFrame pcm length {} not divisible by num_channels {}",
                pcm.len(),
                num_channels
            )));
        }
        Ok(Self {
            pcm,
            sample_rate,
            num_channels,
        })
    }

    /// Build a frame from raw little-endian PCM16 bytes.
    pub fn from_bytes(bytes: &[u8], sample_rate: u32, num_channels: u16) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(PalabraError::Configuration(
                "PCM16 byte slice must have an even length".into(),
            ));
        }
        let pcm = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        Self::new(pcm, sample_rate, num_channels)
    }

    pub fn pcm(&self) -> &[i16] {
        &self.pcm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    pub fn samples_per_channel(&self) -> usize {
        self.pcm.len() / self.num_channels as usize
    }

    /// Interleaved PCM16 as little-endian bytes, suitable for transmission
    /// or for appending to a `Writer`'s accumulator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pcm.len() * 2);
        for sample in &self.pcm {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    pub fn is_silence(&self) -> bool {
        self.pcm.iter().all(|&s| s == 0)
    }
}

/// Computes the fixed cadence framing constants derived from the session's
/// sample rate and chunk duration (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct ChunkFraming {
    pub sample_rate: u32,
    pub num_channels: u16,
    pub chunk_duration_ms: u32,
}

impl ChunkFraming {
    pub fn new(sample_rate: u32, num_channels: u16, chunk_duration_ms: u32) -> Self {
        Self {
            sample_rate,
            num_channels,
            chunk_duration_ms,
        }
    }

    /// Samples per channel in a single chunk.
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as u64 * self.chunk_duration_ms as u64 / 1000) as usize
    }

    /// Bytes per chunk, across all channels, PCM16.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * 2 * self.num_channels as usize
    }

    /// Zero-pad a possibly-short tail chunk (bytes) up to a full frame and
    /// wrap it as an `AudioFrame`. Never emits a partial frame.
    pub fn pad_to_full_frame(&self, mut chunk: Vec<u8>) -> Result<AudioFrame> {
        let target = self.chunk_bytes();
        if chunk.len() < target {
            chunk.resize(target, 0);
        } else if chunk.len() > target {
            chunk.truncate(target);
        }
        AudioFrame::from_bytes(&chunk, self.sample_rate, self.num_channels)
    }
}
