use std::time::Duration;

use crate::{
    envelope::{AdsrPlusEnvelope, EnvelopeParameters, EnvelopeStage},
    utils::{
        automation::{AutomationParam, AutomationTimeline},
        note_to_pitch, pitch_to_rate, velocity_to_gain,
    },
};

use super::PlayableUnit;

// -------------------------------------------------------------------------------------------------

/// A [`PlayableUnit`] which drives an amplitude and a pitch automation timeline with an
/// [`AdsrPlusEnvelope`].
///
/// Renderers sample the timelines via [`gain_at`](Self::gain_at) and
/// [`playback_rate_at`](Self::playback_rate_at). With a glide time set, pitch changes
/// ramp linearly to the new note instead of jumping.
#[derive(Debug, Clone)]
pub struct EnvelopedVoice {
    envelope: AdsrPlusEnvelope,
    amplitude: AutomationTimeline,
    pitch: AutomationTimeline,
    glide_time: Duration,
    note: Option<u8>,
}

impl EnvelopedVoice {
    pub fn new(parameters: EnvelopeParameters) -> Self {
        Self {
            envelope: AdsrPlusEnvelope::new(parameters),
            amplitude: AutomationTimeline::new(0.0),
            pitch: AutomationTimeline::new(note_to_pitch(crate::utils::MIDDLE_C) as f32),
            glide_time: Duration::ZERO,
            note: None,
        }
    }

    /// Builder method to set the portamento time used by `set_pitch`.
    pub fn with_glide_time(mut self, glide_time: Duration) -> Self {
        self.glide_time = glide_time;
        self
    }

    pub fn glide_time(&self) -> Duration {
        self.glide_time
    }
    pub fn set_glide_time(&mut self, glide_time: Duration) {
        self.glide_time = glide_time;
    }

    pub fn envelope(&self) -> &AdsrPlusEnvelope {
        &self.envelope
    }
    pub fn envelope_mut(&mut self) -> &mut AdsrPlusEnvelope {
        &mut self.envelope
    }

    /// Last note that got played or glided to.
    pub fn note(&self) -> Option<u8> {
        self.note
    }

    /// Envelope stage at the given time.
    pub fn stage_at(&self, time: f64) -> EnvelopeStage {
        self.envelope.stage_at(time)
    }

    /// Amplitude automation, as programmed by the envelope.
    pub fn amplitude_automation(&self) -> &AutomationTimeline {
        &self.amplitude
    }
    /// Pitch automation in semitones relative to middle C.
    pub fn pitch_automation(&self) -> &AutomationTimeline {
        &self.pitch
    }

    /// Output gain at the given time.
    pub fn gain_at(&self, time: f64) -> f32 {
        self.amplitude.value_at_time(time)
    }

    /// Playback speed factor at the given time, where 1.0 plays middle C at its original rate.
    pub fn playback_rate_at(&self, time: f64) -> f64 {
        pitch_to_rate(self.pitch.value_at_time(time) as f64)
    }
}

impl PlayableUnit for EnvelopedVoice {
    fn note_on(&mut self, note: u8, velocity: u8, time: f64) {
        // drop automation events of previous notes
        self.amplitude.discard_events_before(time);
        self.pitch.discard_events_before(time);

        self.pitch.cancel_scheduled_values(time);
        self.pitch
            .set_value_at_time(note_to_pitch(note) as f32, time);
        self.envelope
            .trigger(&mut self.amplitude, velocity_to_gain(velocity), time);
        self.note = Some(note);
    }

    fn release(&mut self, time: f64) {
        self.envelope.release(&mut self.amplitude, time);
    }

    fn stop(&mut self, time: f64) {
        self.envelope.stop(&mut self.amplitude, time);
        self.pitch.cancel_scheduled_values(time);
        self.note = None;
    }

    fn set_pitch(&mut self, note: u8, time: f64) {
        // legato glides never retrigger: drop completed glides here
        self.pitch.discard_events_before(time);

        let pitch = note_to_pitch(note) as f32;
        if self.glide_time.is_zero() {
            self.pitch.cancel_scheduled_values(time);
            self.pitch.set_value_at_time(pitch, time);
        } else {
            self.pitch.cancel_and_hold_at_time(time);
            self.pitch
                .linear_ramp_to_value_at_time(pitch, time + self.glide_time.as_secs_f64());
        }
        self.note = Some(note);
    }

    fn amplitude(&self, time: f64) -> f32 {
        self.gain_at(time)
    }

    fn attack_duration(&self) -> f64 {
        self.envelope.attack_time()
    }

    fn release_duration(&self) -> f64 {
        self.envelope.release_time()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::ENVELOPE_FLOOR, Error};

    fn voice() -> Result<EnvelopedVoice, Box<Error>> {
        let parameters = EnvelopeParameters::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            0.5,
            Duration::from_millis(200),
        )?;
        Ok(EnvelopedVoice::new(parameters))
    }

    #[test]
    fn note_on_and_release() -> Result<(), Box<Error>> {
        let mut voice = voice()?;
        voice.note_on(72, 127, 1.0);
        assert_eq!(voice.note(), Some(72));
        assert!((voice.amplitude(1.01) - 1.0).abs() < 1e-4);
        assert!((voice.amplitude(1.5) - 0.5).abs() < 1e-4);
        assert!((voice.playback_rate_at(1.0) - 2.0).abs() < 1e-9);
        assert_eq!(voice.stage_at(1.5), EnvelopeStage::Sustain);

        voice.release(2.0);
        assert_eq!(voice.stage_at(2.1), EnvelopeStage::Release);
        assert!((voice.amplitude(2.2) - ENVELOPE_FLOOR).abs() < 1e-4);
        assert!((voice.attack_duration() - 0.01).abs() < 1e-9);
        assert!((voice.release_duration() - 0.2).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn velocity_scales_peak() -> Result<(), Box<Error>> {
        let mut voice = voice()?;
        voice.note_on(60, 0, 0.0);
        assert!(voice.amplitude(0.01) <= 2.0 * ENVELOPE_FLOOR);
        voice.note_on(60, 127, 1.0);
        assert!((voice.amplitude(1.01) - 1.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn retrigger_drops_old_events() -> Result<(), Box<Error>> {
        let mut voice = voice()?;
        for i in 0..100 {
            voice.note_on(60, 100, i as f64);
            voice.release(i as f64 + 0.5);
        }
        // only the events of the last note and its anchor remain
        assert!(voice.amplitude_automation().events().len() < 10);
        Ok(())
    }

    #[test]
    fn pitch_jump_and_glide() -> Result<(), Box<Error>> {
        let mut voice = voice()?;
        voice.note_on(60, 100, 0.0);
        voice.set_pitch(72, 0.5);
        assert!((voice.playback_rate_at(0.49) - 1.0).abs() < 1e-9);
        assert!((voice.playback_rate_at(0.5) - 2.0).abs() < 1e-9);

        let mut voice = voice.with_glide_time(Duration::from_millis(100));
        voice.note_on(60, 100, 1.0);
        voice.set_pitch(72, 1.5);
        assert!((voice.playback_rate_at(1.5) - 1.0).abs() < 1e-6);
        assert!((voice.pitch_automation().value_at_time(1.55) - 6.0).abs() < 1e-4);
        assert!((voice.playback_rate_at(1.6) - 2.0).abs() < 1e-6);
        assert_eq!(voice.note(), Some(72));
        Ok(())
    }

    #[test]
    fn glides_drop_old_events() -> Result<(), Box<Error>> {
        let mut voice = voice()?.with_glide_time(Duration::from_millis(50));
        voice.note_on(60, 100, 0.0);
        for i in 1..2000 {
            let note = if i % 2 == 0 { 60 } else { 67 };
            voice.set_pitch(note, i as f64 * 0.03);
        }
        // the anchor, the interrupted glide and the running glide
        assert!(voice.pitch_automation().events().len() <= 4);
        let end_time = 1999.0 * 0.03 + 0.05;
        assert!((voice.playback_rate_at(end_time) - pitch_to_rate(7.0)).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn stop_silences_immediately() -> Result<(), Box<Error>> {
        let mut voice = voice()?;
        voice.note_on(60, 100, 0.0);
        voice.stop(0.05);
        assert_eq!(voice.amplitude(0.05), ENVELOPE_FLOOR);
        assert_eq!(voice.note(), None);
        assert_eq!(voice.stage_at(0.06), EnvelopeStage::Idle);
        Ok(())
    }
}
