use std::{ops::Range, sync::Arc};

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Source material for grains: a preloaded, interleaved sample buffer.
pub trait SampleBuffer {
    /// Sample rate of the buffer's frames.
    fn sample_rate(&self) -> u32;
    /// Number of interleaved channels.
    fn channel_count(&self) -> usize;
    /// Number of sample frames.
    fn frame_count(&self) -> usize;

    /// Buffer duration in seconds.
    fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate() as f64
    }

    /// Frame range which plays `duration` seconds starting at `offset` seconds, clamped to the
    /// buffer's frames.
    fn frame_range(&self, offset: f64, duration: f64) -> Range<usize> {
        let frame_count = self.frame_count();
        let sample_rate = self.sample_rate() as f64;
        let start = ((offset.max(0.0) * sample_rate).round() as usize).min(frame_count);
        let end = (((offset + duration).max(0.0) * sample_rate).round() as usize)
            .clamp(start, frame_count);
        start..end
    }
}

/// A sample buffer which can be shared with other threads.
pub type SharedSampleBuffer = Arc<dyn SampleBuffer + Send + Sync>;

// -------------------------------------------------------------------------------------------------

/// A [`SampleBuffer`] which holds interleaved `f32` samples in memory.
///
/// The sample data is shared: clones are cheap and refer to the same buffer.
#[derive(Debug, Clone)]
pub struct MemorySampleBuffer {
    buffer: Arc<Box<[f32]>>,
    channel_count: usize,
    sample_rate: u32,
}

impl MemorySampleBuffer {
    /// Create a new buffer from interleaved samples.
    pub fn new(samples: Vec<f32>, channel_count: usize, sample_rate: u32) -> Result<Self, Error> {
        Self::from_shared(Arc::new(samples.into_boxed_slice()), channel_count, sample_rate)
    }

    /// Create a new buffer which shares the given interleaved sample data.
    pub fn from_shared(
        buffer: Arc<Box<[f32]>>,
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, Error> {
        if sample_rate == 0 {
            return Err(Error::SampleBufferError(
                "sample rate must be > 0".to_string(),
            ));
        }
        if channel_count == 0 {
            return Err(Error::SampleBufferError(
                "channel count must be > 0".to_string(),
            ));
        }
        if buffer.is_empty() {
            return Err(Error::SampleBufferError(
                "sample buffer is empty".to_string(),
            ));
        }
        if buffer.len() % channel_count != 0 {
            return Err(Error::SampleBufferError(format!(
                "sample count {} is not a multiple of the channel count {}",
                buffer.len(),
                channel_count
            )));
        }
        Ok(Self {
            buffer,
            channel_count,
            sample_rate,
        })
    }

    /// Create a silent buffer with the given duration. Mostly useful for tests.
    pub fn silence(duration: f64, channel_count: usize, sample_rate: u32) -> Result<Self, Error> {
        let frame_count = (duration.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(
            vec![0.0; frame_count * channel_count],
            channel_count,
            sample_rate,
        )
    }

    /// Raw interleaved sample data.
    pub fn samples(&self) -> &[f32] {
        &self.buffer
    }

    /// Samples of a single frame, or None when out of bounds.
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.channel_count)?;
        self.buffer.get(start..start + self.channel_count)
    }
}

impl SampleBuffer for MemorySampleBuffer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn frame_count(&self) -> usize {
        self.buffer.len() / self.channel_count
    }
}

// -------------------------------------------------------------------------------------------------
