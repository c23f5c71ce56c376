//! Six stage DAHDSR ("ADSR+") envelope, scheduled ahead of time onto an automatable parameter.

use std::{str::FromStr, time::Duration};

use crate::{
    utils::automation::AutomationParam,
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Smallest level an envelope schedules. Substituted for zero targets, so exponential ramps
/// stay well defined.
pub const ENVELOPE_FLOOR: f32 = 1e-4;

// -------------------------------------------------------------------------------------------------

/// Shape of an envelope ramp.
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
)]
#[strum(ascii_case_insensitive)]
pub enum EnvelopeCurve {
    #[default]
    Linear,
    Exponential,
    /// Fast start, slow end: `log10(1 + 9t)`, scheduled as analytic ramp.
    Logarithmic,
}

impl EnvelopeCurve {
    /// Parse a curve name. Unknown names fall back to [`EnvelopeCurve::Linear`].
    pub fn from_name(name: &str) -> Self {
        Self::from_str(name).unwrap_or_else(|_| {
            log::warn!("Unknown envelope curve '{name}', falling back to 'Linear'");
            Self::default()
        })
    }
}

// -------------------------------------------------------------------------------------------------

/// Stage of a [`AdsrPlusEnvelope`] at a given time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    #[default]
    /// Not triggered yet or hard stopped.
    Idle,
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    /// Releasing or released. Released envelopes hold the floor level until the next trigger.
    Release,
}

// -------------------------------------------------------------------------------------------------

/// Parameters that define the envelope shape of a [`AdsrPlusEnvelope`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeParameters {
    delay_time: Duration,
    attack_time: Duration,
    hold_time: Duration,
    decay_time: Duration,
    sustain_level: f32,
    release_time: Duration,
    velocity_sensitivity: f32,
    attack_curve: EnvelopeCurve,
    decay_curve: EnvelopeCurve,
    release_curve: EnvelopeCurve,
}

impl Default for EnvelopeParameters {
    fn default() -> Self {
        Self {
            delay_time: Duration::ZERO,
            attack_time: Duration::from_millis(10),
            hold_time: Duration::ZERO,
            decay_time: Duration::from_millis(100),
            sustain_level: 0.7,
            release_time: Duration::from_millis(300),
            velocity_sensitivity: 1.0,
            attack_curve: EnvelopeCurve::Linear,
            decay_curve: EnvelopeCurve::Linear,
            release_curve: EnvelopeCurve::Linear,
        }
    }
}

impl EnvelopeParameters {
    /// Create new parameters with the given attack, decay, sustain and release settings,
    /// no delay and hold, full velocity sensitivity and linear curves.
    pub fn new(
        attack_time: Duration,
        decay_time: Duration,
        sustain_level: f32,
        release_time: Duration,
    ) -> Result<Self, Error> {
        let mut parameters = Self::default();
        parameters.set_attack_time(attack_time)?;
        parameters.set_decay_time(decay_time)?;
        parameters.set_sustain_level(sustain_level)?;
        parameters.set_release_time(release_time)?;
        Ok(parameters)
    }

    pub fn delay_time(&self) -> Duration {
        self.delay_time
    }
    pub fn set_delay_time(&mut self, time: Duration) -> Result<(), Error> {
        self.delay_time = time;
        Ok(())
    }

    pub fn attack_time(&self) -> Duration {
        self.attack_time
    }
    /// Set the attack duration. Attack can be zero to jump straight to the peak level.
    pub fn set_attack_time(&mut self, time: Duration) -> Result<(), Error> {
        self.attack_time = time;
        Ok(())
    }

    pub fn hold_time(&self) -> Duration {
        self.hold_time
    }
    pub fn set_hold_time(&mut self, time: Duration) -> Result<(), Error> {
        self.hold_time = time;
        Ok(())
    }

    pub fn decay_time(&self) -> Duration {
        self.decay_time
    }
    pub fn set_decay_time(&mut self, time: Duration) -> Result<(), Error> {
        self.decay_time = time;
        Ok(())
    }

    pub fn sustain_level(&self) -> f32 {
        self.sustain_level
    }
    /// Set the sustain level, relative to the velocity scaled peak level.
    pub fn set_sustain_level(&mut self, level: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&level) {
            return Err(Error::ParameterError(format!(
                "Invalid sustain level: {level}. Must be in range [0.0, 1.0]"
            )));
        }
        self.sustain_level = level;
        Ok(())
    }

    pub fn release_time(&self) -> Duration {
        self.release_time
    }
    pub fn set_release_time(&mut self, time: Duration) -> Result<(), Error> {
        self.release_time = time;
        Ok(())
    }

    pub fn velocity_sensitivity(&self) -> f32 {
        self.velocity_sensitivity
    }
    /// Set how much the trigger velocity scales the peak level.
    /// 0.0 = velocity is ignored, 1.0 = peak level equals velocity.
    pub fn set_velocity_sensitivity(&mut self, sensitivity: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&sensitivity) {
            return Err(Error::ParameterError(format!(
                "Invalid velocity sensitivity: {sensitivity}. Must be in range [0.0, 1.0]"
            )));
        }
        self.velocity_sensitivity = sensitivity;
        Ok(())
    }

    pub fn attack_curve(&self) -> EnvelopeCurve {
        self.attack_curve
    }
    pub fn set_attack_curve(&mut self, curve: EnvelopeCurve) {
        self.attack_curve = curve;
    }

    pub fn decay_curve(&self) -> EnvelopeCurve {
        self.decay_curve
    }
    pub fn set_decay_curve(&mut self, curve: EnvelopeCurve) {
        self.decay_curve = curve;
    }

    pub fn release_curve(&self) -> EnvelopeCurve {
        self.release_curve
    }
    pub fn set_release_curve(&mut self, curve: EnvelopeCurve) {
        self.release_curve = curve;
    }
}

// -------------------------------------------------------------------------------------------------

/// DAHDSR envelope which schedules its stages as automation events onto an [`AutomationParam`].
///
/// The envelope does not run per sample: `trigger` programs delay, attack, hold, decay and sustain
/// back to back, `release` cuts them and ramps down to [`ENVELOPE_FLOOR`]. Apart from the last
/// trigger and release timestamps (used to answer [`stage_at`](Self::stage_at)), the envelope is
/// stateless. There's no terminal stage: after the release, the parameter holds the floor value.
#[derive(Debug, Clone)]
pub struct AdsrPlusEnvelope {
    parameters: EnvelopeParameters,
    trigger_time: Option<f64>,
    release_start_time: Option<f64>,
}

impl AdsrPlusEnvelope {
    pub fn new(parameters: EnvelopeParameters) -> Self {
        Self {
            parameters,
            trigger_time: None,
            release_start_time: None,
        }
    }

    pub fn parameters(&self) -> &EnvelopeParameters {
        &self.parameters
    }

    /// Replace the envelope parameters. Applies to the next trigger or release.
    pub fn set_parameters(&mut self, parameters: EnvelopeParameters) {
        self.parameters = parameters;
    }

    /// Delay + attack + hold + decay + release time in seconds.
    pub fn total_time(&self) -> f64 {
        self.attack_time()
            + self.parameters.decay_time.as_secs_f64()
            + self.parameters.release_time.as_secs_f64()
    }

    /// Time from trigger until the peak level got reached and held in seconds:
    /// delay + attack + hold.
    pub fn attack_time(&self) -> f64 {
        self.parameters.delay_time.as_secs_f64()
            + self.parameters.attack_time.as_secs_f64()
            + self.parameters.hold_time.as_secs_f64()
    }

    /// Release time in seconds.
    pub fn release_time(&self) -> f64 {
        self.parameters.release_time.as_secs_f64()
    }

    /// Peak level for the given normalized velocity.
    pub fn peak_level(&self, velocity: f32) -> f32 {
        let sensitivity = self.parameters.velocity_sensitivity;
        let velocity = velocity.clamp(0.0, 1.0);
        ((1.0 - sensitivity) + sensitivity * velocity).max(ENVELOPE_FLOOR)
    }

    /// Stage the envelope is in at the given time, based on the last trigger and release.
    pub fn stage_at(&self, time: f64) -> EnvelopeStage {
        let Some(trigger_time) = self.trigger_time else {
            return EnvelopeStage::Idle;
        };
        if self.release_start_time.is_some_and(|start| time >= start) {
            return EnvelopeStage::Release;
        }
        let elapsed = time - trigger_time;
        if elapsed < 0.0 {
            return EnvelopeStage::Idle;
        }
        let params = &self.parameters;
        let delay_end = params.delay_time.as_secs_f64();
        let attack_end = delay_end + params.attack_time.as_secs_f64();
        let hold_end = attack_end + params.hold_time.as_secs_f64();
        let decay_end = hold_end + params.decay_time.as_secs_f64();
        if elapsed < delay_end {
            EnvelopeStage::Delay
        } else if elapsed < attack_end {
            EnvelopeStage::Attack
        } else if elapsed < hold_end {
            EnvelopeStage::Hold
        } else if elapsed < decay_end {
            EnvelopeStage::Decay
        } else {
            EnvelopeStage::Sustain
        }
    }

    /// Cancel pending automation on `param` and schedule delay, attack, hold and decay stages
    /// starting at `time`. The parameter then holds the sustain level until released.
    pub fn trigger<P: AutomationParam + ?Sized>(
        &mut self,
        param: &mut P,
        velocity: f32,
        time: f64,
    ) {
        let params = &self.parameters;
        let peak = self.peak_level(velocity);
        let sustain = (params.sustain_level * peak).max(ENVELOPE_FLOOR);

        param.cancel_scheduled_values(time);
        param.set_value_at_time(ENVELOPE_FLOOR, time);

        // Delay
        let attack_start = time + params.delay_time.as_secs_f64();
        if attack_start > time {
            param.set_value_at_time(ENVELOPE_FLOOR, attack_start);
        }
        // Attack
        let attack_duration = params.attack_time.as_secs_f64();
        Self::schedule_ramp(param, params.attack_curve, peak, attack_start, attack_duration);
        // Hold
        let decay_start = attack_start + attack_duration + params.hold_time.as_secs_f64();
        if !params.hold_time.is_zero() {
            param.set_value_at_time(peak, decay_start);
        }
        // Decay, then Sustain
        Self::schedule_ramp(
            param,
            params.decay_curve,
            sustain,
            decay_start,
            params.decay_time.as_secs_f64(),
        );

        self.trigger_time = Some(time);
        self.release_start_time = None;
    }

    /// Cancel future automation, hold the parameter's live value at `time` and ramp down to the
    /// floor level within the release time.
    ///
    /// Returns false and does nothing when the envelope never got triggered or got stopped.
    pub fn release<P: AutomationParam + ?Sized>(&mut self, param: &mut P, time: f64) -> bool {
        if self.trigger_time.is_none() {
            log::debug!("Ignoring envelope release at {time}s: envelope is not running");
            return false;
        }
        param.cancel_and_hold_at_time(time);
        Self::schedule_ramp(
            param,
            self.parameters.release_curve,
            ENVELOPE_FLOOR,
            time,
            self.parameters.release_time.as_secs_f64(),
        );
        self.release_start_time = Some(time);
        true
    }

    /// Immediately reset the parameter to the floor level, bypassing all stages.
    pub fn stop<P: AutomationParam + ?Sized>(&mut self, param: &mut P, time: f64) {
        param.cancel_scheduled_values(time);
        param.set_value_at_time(ENVELOPE_FLOOR, time);
        self.trigger_time = None;
        self.release_start_time = None;
    }

    /// Ramp from the parameter's value at `start_time` to `to`. Needs an event at `start_time`.
    fn schedule_ramp<P: AutomationParam + ?Sized>(
        param: &mut P,
        curve: EnvelopeCurve,
        to: f32,
        start_time: f64,
        duration: f64,
    ) {
        if duration <= 0.0 {
            param.set_value_at_time(to, start_time);
            return;
        }
        let end_time = start_time + duration;
        match curve {
            EnvelopeCurve::Linear => {
                param.linear_ramp_to_value_at_time(to, end_time);
            }
            EnvelopeCurve::Exponential => {
                param.exponential_ramp_to_value_at_time(to.max(ENVELOPE_FLOOR), end_time);
            }
            EnvelopeCurve::Logarithmic => {
                param.logarithmic_ramp_to_value_at_time(to, end_time);
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::automation::{AutomationEvent, AutomationTimeline};

    const EPSILON: f32 = 1e-4;

    fn default_envelope() -> Result<AdsrPlusEnvelope, Box<Error>> {
        let parameters = EnvelopeParameters::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            0.7,
            Duration::from_millis(300),
        )?;
        Ok(AdsrPlusEnvelope::new(parameters))
    }

    #[test]
    fn derived_times() -> Result<(), Box<Error>> {
        let mut parameters = EnvelopeParameters::default();
        parameters.set_delay_time(Duration::from_millis(50))?;
        parameters.set_attack_time(Duration::from_millis(100))?;
        parameters.set_hold_time(Duration::from_millis(200))?;
        parameters.set_decay_time(Duration::from_millis(300))?;
        parameters.set_release_time(Duration::from_millis(400))?;
        let env = AdsrPlusEnvelope::new(parameters);
        assert!((env.attack_time() - 0.35).abs() < 1e-9);
        assert!((env.release_time() - 0.4).abs() < 1e-9);
        assert!((env.total_time() - 1.05).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn invalid_parameters() {
        let mut parameters = EnvelopeParameters::default();
        assert!(parameters.set_sustain_level(1.5).is_err());
        assert!(parameters.set_velocity_sensitivity(-0.1).is_err());
        assert_eq!(parameters.sustain_level(), 0.7);
    }

    #[test]
    fn curve_names() {
        assert_eq!(EnvelopeCurve::from_name("exponential"), EnvelopeCurve::Exponential);
        assert_eq!(EnvelopeCurve::from_name("Logarithmic"), EnvelopeCurve::Logarithmic);
        assert_eq!(EnvelopeCurve::from_name("wobbly"), EnvelopeCurve::Linear);
    }

    #[test]
    fn peak_level_velocity_scaling() -> Result<(), Box<Error>> {
        let mut env = default_envelope()?;
        assert_eq!(env.peak_level(1.0), 1.0);
        assert!((env.peak_level(0.5) - 0.5).abs() < EPSILON);
        let mut parameters = env.parameters().clone();
        parameters.set_velocity_sensitivity(0.5)?;
        env.set_parameters(parameters);
        assert!((env.peak_level(0.0) - 0.5).abs() < EPSILON);
        assert!((env.peak_level(1.0) - 1.0).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn trigger_then_release() -> Result<(), Box<Error>> {
        let mut env = default_envelope()?;
        let mut param = AutomationTimeline::default();
        env.trigger(&mut param, 1.0, 0.0);
        assert_eq!(param.value_at_time(0.0), ENVELOPE_FLOOR);
        assert!((param.value_at_time(0.01) - 1.0).abs() < EPSILON);
        assert!((param.value_at_time(0.11) - 0.7).abs() < EPSILON);
        assert!((param.value_at_time(0.5) - 0.7).abs() < EPSILON);

        assert!(env.release(&mut param, 0.5));
        assert!((param.value_at_time(0.5) - 0.7).abs() < EPSILON);
        let halfway = (0.7 + ENVELOPE_FLOOR) / 2.0;
        assert!((param.value_at_time(0.65) - halfway).abs() < EPSILON);
        assert!((param.value_at_time(0.8) - ENVELOPE_FLOOR).abs() < EPSILON);
        assert_eq!(param.value_at_time(10.0), ENVELOPE_FLOOR);
        Ok(())
    }

    #[test]
    fn stages() -> Result<(), Box<Error>> {
        let mut parameters = EnvelopeParameters::default();
        parameters.set_delay_time(Duration::from_millis(100))?;
        parameters.set_attack_time(Duration::from_millis(100))?;
        parameters.set_hold_time(Duration::from_millis(100))?;
        parameters.set_decay_time(Duration::from_millis(100))?;
        let mut env = AdsrPlusEnvelope::new(parameters);
        let mut param = AutomationTimeline::default();
        assert_eq!(env.stage_at(0.0), EnvelopeStage::Idle);
        env.trigger(&mut param, 1.0, 1.0);
        assert_eq!(env.stage_at(0.5), EnvelopeStage::Idle);
        assert_eq!(env.stage_at(1.05), EnvelopeStage::Delay);
        assert_eq!(env.stage_at(1.15), EnvelopeStage::Attack);
        assert_eq!(env.stage_at(1.25), EnvelopeStage::Hold);
        assert_eq!(env.stage_at(1.35), EnvelopeStage::Decay);
        assert_eq!(env.stage_at(2.0), EnvelopeStage::Sustain);
        // delay holds the floor, hold holds the peak
        assert_eq!(param.value_at_time(1.05), ENVELOPE_FLOOR);
        assert!((param.value_at_time(1.25) - 1.0).abs() < EPSILON);
        env.release(&mut param, 3.0);
        assert_eq!(env.stage_at(3.0), EnvelopeStage::Release);
        assert_eq!(env.stage_at(30.0), EnvelopeStage::Release);
        env.stop(&mut param, 4.0);
        assert_eq!(env.stage_at(5.0), EnvelopeStage::Idle);
        Ok(())
    }

    #[test]
    fn exponential_attack_stays_below_peak() -> Result<(), Box<Error>> {
        let mut env = default_envelope()?;
        let mut parameters = env.parameters().clone();
        parameters.set_attack_time(Duration::from_millis(100))?;
        parameters.set_attack_curve(EnvelopeCurve::Exponential);
        env.set_parameters(parameters);
        let mut param = AutomationTimeline::default();
        let velocity = 0.8;
        let peak = env.peak_level(velocity);
        env.trigger(&mut param, velocity, 0.0);
        assert!(param
            .events()
            .iter()
            .any(|e| matches!(e, AutomationEvent::ExponentialRamp { .. })));
        let mut previous = 0.0;
        for step in 0..=100 {
            let value = param.value_at_time(step as f64 * 0.001);
            assert!(value <= peak + EPSILON);
            assert!(value >= previous);
            previous = value;
        }
        assert!((param.value_at_time(0.1) - peak).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn exponential_ramps_never_target_zero() -> Result<(), Box<Error>> {
        let mut parameters = EnvelopeParameters::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            0.0,
            Duration::from_millis(100),
        )?;
        parameters.set_decay_curve(EnvelopeCurve::Exponential);
        parameters.set_release_curve(EnvelopeCurve::Exponential);
        let mut env = AdsrPlusEnvelope::new(parameters);
        let mut param = AutomationTimeline::default();
        env.trigger(&mut param, 1.0, 0.0);
        env.release(&mut param, 0.05);
        for event in param.events() {
            if let AutomationEvent::ExponentialRamp { value, .. } = event {
                assert!(*value >= ENVELOPE_FLOOR);
            }
        }
        assert!((param.value_at_time(0.15) - ENVELOPE_FLOOR).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn logarithmic_release_curve() -> Result<(), Box<Error>> {
        let mut env = default_envelope()?;
        let mut parameters = env.parameters().clone();
        parameters.set_release_curve(EnvelopeCurve::Logarithmic);
        env.set_parameters(parameters);
        let mut param = AutomationTimeline::default();
        env.trigger(&mut param, 1.0, 0.0);
        env.release(&mut param, 1.0);
        assert!(param
            .events()
            .iter()
            .any(|e| matches!(e, AutomationEvent::LogarithmicRamp { .. })));
        assert!((param.value_at_time(1.0) - 0.7).abs() < EPSILON);
        // logarithmic: more than half way down after a quarter of the time
        let quarter = param.value_at_time(1.075);
        assert!(quarter < (0.7 + ENVELOPE_FLOOR) / 2.0);
        assert!((param.value_at_time(1.3) - ENVELOPE_FLOOR).abs() < EPSILON);
        Ok(())
    }

    #[test]
    fn zero_release_sets_floor_immediately() -> Result<(), Box<Error>> {
        let mut env = default_envelope()?;
        let mut parameters = env.parameters().clone();
        parameters.set_release_time(Duration::ZERO)?;
        env.set_parameters(parameters);
        let mut param = AutomationTimeline::default();
        env.trigger(&mut param, 1.0, 0.0);
        env.release(&mut param, 0.5);
        assert_eq!(param.value_at_time(0.5), ENVELOPE_FLOOR);
        Ok(())
    }

    #[test]
    fn release_without_trigger_is_ignored() -> Result<(), Box<Error>> {
        let mut env = default_envelope()?;
        let mut param = AutomationTimeline::new(0.25);
        assert!(!env.release(&mut param, 0.0));
        assert!(param.events().is_empty());
        Ok(())
    }

    #[test]
    fn release_during_attack_starts_at_live_value() -> Result<(), Box<Error>> {
        let mut env = default_envelope()?;
        let mut parameters = env.parameters().clone();
        parameters.set_attack_time(Duration::from_millis(100))?;
        env.set_parameters(parameters);
        let mut param = AutomationTimeline::default();
        env.trigger(&mut param, 1.0, 0.0);
        let live = param.value_at_time(0.05);
        env.release(&mut param, 0.05);
        assert!((param.value_at_time(0.05) - live).abs() < EPSILON);
        assert!(param.value_at_time(0.2) < live);
        assert!((param.value_at_time(0.35) - ENVELOPE_FLOOR).abs() < EPSILON);
        Ok(())
    }
}
