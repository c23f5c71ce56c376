//! Granular emission: grain descriptions, grain window shapes, grain voices and the scheduler
//! which emits them.

use std::{str::FromStr, sync::LazyLock};

use strum::EnumCount;

// -------------------------------------------------------------------------------------------------

mod buffer;
mod pool;
mod scheduler;
mod voice;

pub use buffer::{MemorySampleBuffer, SampleBuffer, SharedSampleBuffer};
pub use pool::{GrainPool, GrainTriggerResult, GRAIN_POOL_SIZE};
pub use scheduler::{
    GrainScheduler, GrainSchedulerOptions, SchedulerParameterUpdate, SchedulerParameters,
    SchedulerStats,
};
pub use voice::GrainVoice;

// -------------------------------------------------------------------------------------------------

/// Amplitude window applied over a grain's duration.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumCount,
)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum GrainEnvelopeShape {
    /// Raised cosine: `0.5 * (1 - cos(2πt))`.
    #[default]
    Hann = 0,
    /// Linear rise to the midpoint, linear fall to zero at the end.
    Triangle = 1,
    /// Gaussian bell around the midpoint with a standard deviation of 0.3.
    Gaussian = 2,
}

impl GrainEnvelopeShape {
    /// Parse a shape name. Unknown names fall back to [`GrainEnvelopeShape::Hann`].
    pub fn from_name(name: &str) -> Self {
        Self::from_str(name).unwrap_or_else(|_| {
            log::warn!("Unknown grain envelope shape '{name}', falling back to 'Hann'");
            Self::default()
        })
    }

    /// Evaluate the unscaled window at the given normalized phase [0.0, 1.0].
    #[inline]
    pub fn window(&self, phase: f64) -> f32 {
        GRAIN_WINDOW_LUT.sample(*self, phase)
    }
}

// -------------------------------------------------------------------------------------------------

/// Number of precomputed points per grain window. Odd, so the window center is a point.
pub(crate) const GRAIN_WINDOW_POINTS: usize = 513;

/// Precomputed grain windows, evaluated at `N` discrete points over the grain duration.
pub(crate) struct GrainWindow<const N: usize> {
    luts: [[f32; N]; GrainEnvelopeShape::COUNT],
}

impl<const N: usize> GrainWindow<N> {
    const GAUSSIAN_SIGMA: f32 = 0.3;

    /// Precompute all window LUTs
    pub fn new() -> Self {
        debug_assert!(N >= 2, "Need at least two window points");
        let mut luts = [[0.0; N]; GrainEnvelopeShape::COUNT];

        #[allow(clippy::needless_range_loop)]
        for i in 0..N {
            // [0.0, 1.0], including both window ends
            let phase = i as f32 / (N - 1) as f32;

            luts[GrainEnvelopeShape::Hann as usize][i] =
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * phase).cos());

            luts[GrainEnvelopeShape::Triangle as usize][i] = if phase < 0.5 {
                2.0 * phase
            } else {
                2.0 * (1.0 - phase)
            };

            let sigma = Self::GAUSSIAN_SIGMA;
            luts[GrainEnvelopeShape::Gaussian as usize][i] =
                (-((phase - 0.5) * (phase - 0.5)) / (2.0 * sigma * sigma)).exp();
        }

        Self { luts }
    }

    /// Evaluate a window at normalized phase [0.0, 1.0], linearly interpolating between points.
    #[inline]
    pub fn sample(&self, shape: GrainEnvelopeShape, phase: f64) -> f32 {
        let lut = &self.luts[shape as usize];
        let index_float = phase.clamp(0.0, 1.0) * (N - 1) as f64;
        let index = index_float as usize;
        if index >= N - 1 {
            lut[N - 1]
        } else {
            let fraction = (index_float - index as f64) as f32;
            lut[index] * (1.0 - fraction) + lut[index + 1] * fraction
        }
    }
}

/// Static, shared lookup table for the grain window shapes
static GRAIN_WINDOW_LUT: LazyLock<GrainWindow<GRAIN_WINDOW_POINTS>> =
    LazyLock::new(GrainWindow::new);

// -------------------------------------------------------------------------------------------------

/// Description of a single grain, created fresh for each trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grain {
    /// Normalized start position in the sample buffer [0.0, 1.0].
    pub sample_position: f32,
    /// Grain duration in seconds.
    pub duration: f64,
    /// Pitch offset in semitones.
    pub pitch: f32,
    /// Stereo panning [-1.0, 1.0].
    pub pan: f32,
    /// Peak amplitude of the grain window [0.0, 1.0].
    pub gain: f32,
    pub shape: GrainEnvelopeShape,
    /// Requests reversed playback. Reverse playback is not supported: grains always play
    /// forward, the flag is carried along for renderers which can play backwards.
    pub reverse: bool,
}

impl Default for Grain {
    fn default() -> Self {
        Self {
            sample_position: 0.0,
            duration: 0.1,
            pitch: 0.0,
            pan: 0.0,
            gain: 1.0,
            shape: GrainEnvelopeShape::default(),
            reverse: false,
        }
    }
}

// -------------------------------------------------------------------------------------------------
