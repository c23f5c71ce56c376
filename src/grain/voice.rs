use std::ops::Range;

use crate::utils::pitch_to_rate;

use super::{buffer::SampleBuffer, Grain};

// -------------------------------------------------------------------------------------------------

/// Plays a single [`Grain`]: a bounded, windowed excerpt of a sample buffer.
///
/// Grain voices are pool slots: a voice is active from `trigger` until the grain's stop time
/// passed and the owning pool reclaimed it. Playback itself is done by an external renderer,
/// which reads the voice's frame range, playback rate, pan and [`gain_at`](Self::gain_at).
#[derive(Debug, Clone, Copy)]
pub struct GrainVoice {
    active: bool,
    grain: Grain,
    playback_rate: f64,
    start_frame: usize,
    end_frame: usize,
    sample_rate: u32,
    start_time: f64,
    stop_time: f64,
    fade_start_time: f64,
    fade_end_time: f64,
}

impl Default for GrainVoice {
    fn default() -> Self {
        Self::new()
    }
}

impl GrainVoice {
    /// Create a new inactive grain voice.
    pub const fn new() -> Self {
        Self {
            active: false,
            grain: Grain {
                sample_position: 0.0,
                duration: 0.0,
                pitch: 0.0,
                pan: 0.0,
                gain: 0.0,
                shape: super::GrainEnvelopeShape::Hann,
                reverse: false,
            },
            playback_rate: 1.0,
            start_frame: 0,
            end_frame: 0,
            sample_rate: 0,
            start_time: 0.0,
            stop_time: 0.0,
            fade_start_time: f64::INFINITY,
            fade_end_time: f64::INFINITY,
        }
    }

    /// Start playing `grain` from `buffer` at `start_time`.
    ///
    /// The grain's duration gets clamped to the buffer material that is left after the grain's
    /// start offset. Returns false and stays inactive when nothing is left to play.
    pub fn trigger(&mut self, buffer: &dyn SampleBuffer, grain: &Grain, start_time: f64) -> bool {
        let buffer_duration = buffer.duration();
        let position = grain.sample_position.clamp(0.0, 1.0) as f64;
        let offset = position * buffer_duration;
        if grain.duration.is_nan() || grain.duration <= 0.0 {
            log::warn!(
                "Skipping grain at {start_time}s: invalid duration {}s",
                grain.duration
            );
            return false;
        }
        let duration = grain.duration.min(buffer_duration - offset);
        if duration <= 0.0 {
            log::warn!(
                "Skipping grain at {start_time}s: position {position} with duration {}s exceeds \
                the buffer duration of {buffer_duration}s",
                grain.duration
            );
            return false;
        }
        if grain.reverse {
            log::debug!("Reverse grain playback is not supported, playing grain forward");
        }

        let frames = buffer.frame_range(offset, duration);
        self.active = true;
        self.grain = Grain {
            sample_position: position as f32,
            duration,
            pitch: grain.pitch,
            pan: grain.pan.clamp(-1.0, 1.0),
            gain: grain.gain.clamp(0.0, 1.0),
            ..*grain
        };
        self.playback_rate = pitch_to_rate(grain.pitch as f64);
        self.start_frame = frames.start;
        self.end_frame = frames.end;
        self.sample_rate = buffer.sample_rate();
        self.start_time = start_time;
        self.stop_time = start_time + duration;
        self.fade_start_time = f64::INFINITY;
        self.fade_end_time = f64::INFINITY;
        true
    }

    /// Stop the grain at the given time. Does nothing when the voice is inactive or already
    /// stops earlier.
    pub fn stop(&mut self, when: f64) {
        if self.active {
            self.stop_time = self.stop_time.min(when.max(self.start_time));
        }
    }

    /// Fade the grain out over `fade_time` seconds starting at `time`, then stop it.
    ///
    /// The fade ends at `time + fade_time` for all grains: a grain which starts within the fade
    /// joins the fade in progress, a grain which starts after it never plays.
    pub fn fade_out(&mut self, time: f64, fade_time: f64) {
        if !self.active || time >= self.stop_time {
            return;
        }
        let fade_end_time = time + fade_time.max(0.0);
        if self.start_time >= fade_end_time {
            self.stop(self.start_time);
            return;
        }
        self.fade_start_time = time;
        self.fade_end_time = fade_end_time;
        self.stop(fade_end_time);
    }

    /// True when the voice got triggered and was not yet reclaimed by its pool.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True when the grain is audible at the given time.
    pub fn is_playing(&self, now: f64) -> bool {
        self.active && now >= self.start_time && now < self.stop_time
    }

    /// True when the grain is inactive or its stop time has passed.
    pub fn is_finished(&self, now: f64) -> bool {
        !self.active || now >= self.stop_time
    }

    /// Seconds until the grain stops, including the time until a pending grain starts.
    pub fn remaining_time(&self, now: f64) -> f64 {
        if self.active {
            (self.stop_time - now).max(0.0)
        } else {
            0.0
        }
    }

    /// The grain as it got triggered, with its clamped duration.
    pub fn grain(&self) -> &Grain {
        &self.grain
    }

    /// Playback speed factor, derived from the grain's pitch.
    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Stereo panning [-1.0, 1.0].
    pub fn pan(&self) -> f32 {
        self.grain.pan
    }

    /// Frames of the sample buffer the grain plays.
    pub fn frame_range(&self) -> Range<usize> {
        self.start_frame..self.end_frame
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Scheduled stop time, including early stops and fade outs.
    pub fn stop_time(&self) -> f64 {
        self.stop_time
    }

    /// Fractional buffer frame the grain plays at the given time, or None when not playing.
    pub fn frame_position_at(&self, time: f64) -> Option<f64> {
        if !self.is_playing(time) {
            return None;
        }
        let elapsed = time - self.start_time;
        let position =
            self.start_frame as f64 + elapsed * self.sample_rate as f64 * self.playback_rate;
        (position < self.end_frame as f64).then_some(position)
    }

    /// Window amplitude, including fade outs, at the given time. Zero when not playing.
    pub fn gain_at(&self, time: f64) -> f32 {
        if !self.is_playing(time) {
            return 0.0;
        }
        let phase = (time - self.start_time) / self.grain.duration;
        let mut gain = self.grain.shape.window(phase) * self.grain.gain;
        if time >= self.fade_start_time {
            let fade_duration = self.fade_end_time - self.fade_start_time;
            let fade = if fade_duration > 0.0 {
                1.0 - ((time - self.fade_start_time) / fade_duration).clamp(0.0, 1.0)
            } else {
                0.0
            };
            gain *= fade as f32;
        }
        gain
    }

    /// Free the voice, so it can be reused for a new grain.
    pub(crate) fn reclaim(&mut self) {
        self.active = false;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grain::{GrainEnvelopeShape, MemorySampleBuffer},
        Error,
    };

    fn buffer() -> Result<MemorySampleBuffer, Box<Error>> {
        Ok(MemorySampleBuffer::silence(1.0, 2, 1000)?)
    }

    #[test]
    fn duration_gets_clamped_to_buffer() -> Result<(), Box<Error>> {
        let buffer = buffer()?;
        let mut voice = GrainVoice::new();
        let grain = Grain {
            sample_position: 0.9,
            duration: 1.0,
            ..Grain::default()
        };
        assert!(voice.trigger(&buffer, &grain, 2.0));
        assert!((voice.grain().duration - 0.1).abs() < 1e-6);
        assert!((voice.stop_time() - 2.1).abs() < 1e-6);
        assert_eq!(voice.frame_range(), 900..1000);
        Ok(())
    }

    #[test]
    fn grain_at_buffer_end_is_skipped() -> Result<(), Box<Error>> {
        let buffer = buffer()?;
        let mut voice = GrainVoice::new();
        let grain = Grain {
            sample_position: 1.0,
            ..Grain::default()
        };
        assert!(!voice.trigger(&buffer, &grain, 0.0));
        assert!(!voice.is_active());
        let grain = Grain {
            duration: 0.0,
            ..Grain::default()
        };
        assert!(!voice.trigger(&buffer, &grain, 0.0));
        assert!(!voice.is_active());
        Ok(())
    }

    #[test]
    fn playback_window() -> Result<(), Box<Error>> {
        let buffer = buffer()?;
        let mut voice = GrainVoice::new();
        let grain = Grain {
            sample_position: 0.5,
            duration: 0.2,
            pitch: 12.0,
            pan: -0.5,
            gain: 0.8,
            shape: GrainEnvelopeShape::Triangle,
            reverse: false,
        };
        assert!(voice.trigger(&buffer, &grain, 1.0));
        assert!((voice.playback_rate() - 2.0).abs() < 1e-9);
        assert_eq!(voice.pan(), -0.5);

        assert!(!voice.is_playing(0.99));
        assert!(voice.is_playing(1.0));
        assert!(voice.is_playing(1.19));
        assert!(!voice.is_playing(1.2));
        assert!(voice.is_finished(1.2));

        assert_eq!(voice.gain_at(0.5), 0.0);
        assert!((voice.gain_at(1.1) - 0.8).abs() < 1e-3);
        assert!((voice.gain_at(1.05) - 0.4).abs() < 1e-3);
        assert_eq!(voice.gain_at(1.3), 0.0);

        assert!((voice.remaining_time(1.05) - 0.15).abs() < 1e-9);
        assert!((voice.remaining_time(0.0) - 1.2).abs() < 1e-9);
        assert_eq!(voice.remaining_time(5.0), 0.0);

        assert_eq!(voice.frame_position_at(1.0), Some(500.0));
        let position = voice.frame_position_at(1.1).unwrap_or_default();
        assert!((position - 700.0).abs() < 1e-6);
        assert_eq!(voice.frame_position_at(2.0), None);
        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> Result<(), Box<Error>> {
        let buffer = buffer()?;
        let mut voice = GrainVoice::new();
        voice.stop(0.0);
        assert!(!voice.is_active());

        assert!(voice.trigger(&buffer, &Grain::default(), 0.0));
        voice.stop(0.05);
        voice.stop(0.08);
        voice.stop(0.05);
        assert_eq!(voice.stop_time(), 0.05);
        assert!(!voice.is_playing(0.05));
        assert_eq!(voice.remaining_time(0.05), 0.0);
        Ok(())
    }

    #[test]
    fn fade_out() -> Result<(), Box<Error>> {
        let buffer = buffer()?;
        let mut voice = GrainVoice::new();
        let grain = Grain {
            duration: 0.5,
            shape: GrainEnvelopeShape::Triangle,
            ..Grain::default()
        };
        assert!(voice.trigger(&buffer, &grain, 0.0));
        voice.fade_out(0.25, 0.1);
        assert!((voice.stop_time() - 0.35).abs() < 1e-9);
        assert!((voice.gain_at(0.25) - 1.0).abs() < 1e-3);
        // window 0.8 at 0.3, faded by half
        assert!((voice.gain_at(0.3) - 0.4).abs() < 1e-3);
        assert_eq!(voice.gain_at(0.36), 0.0);
        Ok(())
    }

    #[test]
    fn fade_out_of_pending_grains() -> Result<(), Box<Error>> {
        let buffer = buffer()?;
        let grain = Grain {
            duration: 0.5,
            shape: GrainEnvelopeShape::Triangle,
            ..Grain::default()
        };

        // starts within the fade: joins it and ends with it
        let mut voice = GrainVoice::new();
        assert!(voice.trigger(&buffer, &grain, 0.3));
        voice.fade_out(0.25, 0.1);
        assert!((voice.stop_time() - 0.35).abs() < 1e-9);
        assert_eq!(voice.gain_at(0.3), 0.0);
        // window 0.08 at 0.32, faded to 0.3
        assert!((voice.gain_at(0.32) - 0.024).abs() < 1e-3);
        assert_eq!(voice.gain_at(0.35), 0.0);

        // starts after the fade: never plays
        let mut voice = GrainVoice::new();
        assert!(voice.trigger(&buffer, &grain, 0.4));
        voice.fade_out(0.25, 0.1);
        assert_eq!(voice.stop_time(), 0.4);
        assert!(!voice.is_playing(0.4));
        assert!(voice.is_finished(0.4));
        Ok(())
    }

    #[test]
    fn nan_duration_is_skipped() -> Result<(), Box<Error>> {
        let buffer = buffer()?;
        let mut voice = GrainVoice::new();
        let grain = Grain {
            duration: f64::NAN,
            ..Grain::default()
        };
        assert!(!voice.trigger(&buffer, &grain, 0.0));
        assert!(!voice.is_active());
        let grain = Grain {
            duration: -0.1,
            ..Grain::default()
        };
        assert!(!voice.trigger(&buffer, &grain, 0.0));
        Ok(())
    }
}
