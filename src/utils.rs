//! Shared helpers: scheduling clocks, parameter automation and pitch/gain conversions.

pub mod automation;
pub(crate) mod event;
pub mod time;

// -------------------------------------------------------------------------------------------------

/// MIDI note number which plays back samples and grains at their original pitch.
pub const MIDDLE_C: u8 = 60;

// -------------------------------------------------------------------------------------------------

/// Playback rate for the given pitch offset in semitones: `2^(semitones/12)`.
#[inline]
pub fn pitch_to_rate(semitones: f64) -> f64 {
    (semitones / 12.0).exp2()
}

/// Pitch offset in semitones of the given MIDI note relative to [`MIDDLE_C`].
#[inline]
pub fn note_to_pitch(note: u8) -> f64 {
    note as f64 - MIDDLE_C as f64
}

/// Normalized gain from a MIDI velocity: `velocity / 127`, clamped to `0.0..=1.0`.
#[inline]
pub fn velocity_to_gain(velocity: u8) -> f32 {
    (velocity as f32 / 127.0).clamp(0.0, 1.0)
}

// -------------------------------------------------------------------------------------------------
