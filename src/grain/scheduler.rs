use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    utils::{note_to_pitch, time::SchedulingClock, velocity_to_gain},
    Error,
};

use super::{
    buffer::SharedSampleBuffer,
    pool::{GrainPool, GrainTriggerResult},
    Grain, GrainEnvelopeShape, GrainVoice,
};

// -------------------------------------------------------------------------------------------------

/// Options to create a [`GrainScheduler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainSchedulerOptions {
    /// Horizon ahead of the current time within which grains get scheduled. By default 100ms.
    pub look_ahead: Duration,
    /// Interval in which the host should call [`GrainScheduler::tick`]. Must be shorter than
    /// the look ahead time to get gap free emission. By default 25ms.
    pub tick_interval: Duration,
    /// Maximum number of grains a single tick schedules. By default 16.
    pub max_grains_per_tick: usize,
    /// Seed for the grain randomization. When None, the random generator gets seeded from the
    /// OS. By default None.
    pub seed: Option<u64>,
}

impl Default for GrainSchedulerOptions {
    fn default() -> Self {
        Self {
            look_ahead: Duration::from_millis(100),
            tick_interval: Duration::from_millis(25),
            max_grains_per_tick: 16,
            seed: None,
        }
    }
}

impl GrainSchedulerOptions {
    pub fn look_ahead(mut self, look_ahead: Duration) -> Self {
        self.look_ahead = look_ahead;
        self
    }

    pub fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn max_grains_per_tick(mut self, max_grains_per_tick: usize) -> Self {
        self.max_grains_per_tick = max_grains_per_tick;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if self.look_ahead.is_zero() {
            return Err(Error::ParameterError(
                "grain scheduler 'look_ahead' must be > 0".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::ParameterError(
                "grain scheduler 'tick_interval' must be > 0".to_string(),
            ));
        }
        if self.max_grains_per_tick == 0 {
            return Err(Error::ParameterError(
                "grain scheduler 'max_grains_per_tick' must be > 0".to_string(),
            ));
        }
        if self.tick_interval > self.look_ahead {
            log::warn!(
                "Grain scheduler tick interval {:?} exceeds the look ahead time {:?}: \
                emitted grains will have gaps",
                self.tick_interval,
                self.look_ahead
            );
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Live grain emission parameters, read on every scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerParameters {
    /// Grain duration in seconds (0.001 - 10.0).
    pub grain_size: f64,
    /// Number of grains emitted per second (0.1 - 1000.0).
    pub grain_density: f64,
    /// Normalized base position in the sample buffer (0.0 - 1.0).
    pub sample_position: f32,
    /// Random position offset range, relative to the buffer length (0.0 - 1.0).
    pub position_random: f32,
    /// Base pitch offset in semitones.
    pub pitch: f32,
    /// Random pitch offset range in semitones (>= 0).
    pub pitch_random: f32,
    pub envelope_shape: GrainEnvelopeShape,
    /// Probability of grains being flagged as reversed (0.0 - 1.0).
    pub reverse_probability: f32,
    /// Random stereo spread (0.0 - 1.0).
    pub spread: f32,
    /// Grain peak amplitude (0.0 - 1.0).
    pub gain: f32,
}

impl Default for SchedulerParameters {
    fn default() -> Self {
        Self {
            grain_size: 0.1,
            grain_density: 10.0,
            sample_position: 0.5,
            position_random: 0.0,
            pitch: 0.0,
            pitch_random: 0.0,
            envelope_shape: GrainEnvelopeShape::Hann,
            reverse_probability: 0.0,
            spread: 0.0,
            gain: 0.8,
        }
    }
}

impl SchedulerParameters {
    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        fn check<T: PartialOrd + std::fmt::Display>(
            name: &str,
            value: T,
            min: T,
            max: T,
        ) -> Result<(), Error> {
            // also rejects NaNs
            if value >= min && value <= max {
                Ok(())
            } else {
                Err(Error::ParameterError(format!(
                    "grain parameter '{name}' value is '{value}', expected a value in range \
                    [{min}, {max}]"
                )))
            }
        }
        check("grain_size", self.grain_size, 0.001, 10.0)?;
        check("grain_density", self.grain_density, 0.1, 1000.0)?;
        check("sample_position", self.sample_position, 0.0, 1.0)?;
        check("position_random", self.position_random, 0.0, 1.0)?;
        check("pitch", self.pitch, -96.0, 96.0)?;
        check("pitch_random", self.pitch_random, 0.0, 96.0)?;
        check("reverse_probability", self.reverse_probability, 0.0, 1.0)?;
        check("spread", self.spread, 0.0, 1.0)?;
        check("gain", self.gain, 0.0, 1.0)?;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Partial update of [`SchedulerParameters`]: only parameters which are set get applied.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SchedulerParameterUpdate {
    pub grain_size: Option<f64>,
    pub grain_density: Option<f64>,
    pub sample_position: Option<f32>,
    pub position_random: Option<f32>,
    pub pitch: Option<f32>,
    pub pitch_random: Option<f32>,
    pub envelope_shape: Option<GrainEnvelopeShape>,
    pub reverse_probability: Option<f32>,
    pub spread: Option<f32>,
    pub gain: Option<f32>,
}

impl SchedulerParameterUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grain_size(mut self, grain_size: f64) -> Self {
        self.grain_size = Some(grain_size);
        self
    }
    pub fn grain_density(mut self, grain_density: f64) -> Self {
        self.grain_density = Some(grain_density);
        self
    }
    pub fn sample_position(mut self, sample_position: f32) -> Self {
        self.sample_position = Some(sample_position);
        self
    }
    pub fn position_random(mut self, position_random: f32) -> Self {
        self.position_random = Some(position_random);
        self
    }
    pub fn pitch(mut self, pitch: f32) -> Self {
        self.pitch = Some(pitch);
        self
    }
    pub fn pitch_random(mut self, pitch_random: f32) -> Self {
        self.pitch_random = Some(pitch_random);
        self
    }
    pub fn envelope_shape(mut self, envelope_shape: GrainEnvelopeShape) -> Self {
        self.envelope_shape = Some(envelope_shape);
        self
    }
    pub fn reverse_probability(mut self, reverse_probability: f32) -> Self {
        self.reverse_probability = Some(reverse_probability);
        self
    }
    pub fn spread(mut self, spread: f32) -> Self {
        self.spread = Some(spread);
        self
    }
    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = Some(gain);
        self
    }

    /// Apply all set values to a copy of the given parameters.
    pub fn apply_to(&self, parameters: &SchedulerParameters) -> SchedulerParameters {
        SchedulerParameters {
            grain_size: self.grain_size.unwrap_or(parameters.grain_size),
            grain_density: self.grain_density.unwrap_or(parameters.grain_density),
            sample_position: self.sample_position.unwrap_or(parameters.sample_position),
            position_random: self.position_random.unwrap_or(parameters.position_random),
            pitch: self.pitch.unwrap_or(parameters.pitch),
            pitch_random: self.pitch_random.unwrap_or(parameters.pitch_random),
            envelope_shape: self.envelope_shape.unwrap_or(parameters.envelope_shape),
            reverse_probability: self
                .reverse_probability
                .unwrap_or(parameters.reverse_probability),
            spread: self.spread.unwrap_or(parameters.spread),
            gain: self.gain.unwrap_or(parameters.gain),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Grain scheduling statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SchedulerStats {
    /// Number of grains which got started.
    pub grains_scheduled: u64,
    /// Number of grains which got dropped because the grain pool was exhausted.
    pub grains_dropped: u64,
    /// Number of grains which got skipped because of invalid grain geometry.
    pub grains_skipped: u64,
    /// Start time of the last started grain.
    pub last_schedule_time: Option<f64>,
}

// -------------------------------------------------------------------------------------------------

/// Emits grains from a sample buffer, continuously or on demand.
///
/// Continuous emission uses look-ahead scheduling: each [`tick`](Self::tick) schedules all grains
/// which start before `now + look_ahead`, so grains start sample accurately even when ticks
/// arrive late or irregularly. A tick never schedules more than `max_grains_per_tick` grains,
/// and a scheduler which fell behind skips the missed grains instead of catching up.
///
/// Grain parameters get randomized with the scheduler's random generator `R`, which can be
/// seeded or injected for reproducible emission.
///
/// All scheduling calls are no-ops while no sample buffer is set.
pub struct GrainScheduler<R: Rng = SmallRng> {
    options: GrainSchedulerOptions,
    parameters: SchedulerParameters,
    sample_buffer: Option<SharedSampleBuffer>,
    grain_pool: GrainPool,
    emitting: bool,
    next_grain_time: f64,
    stats: SchedulerStats,
    rng: R,
}

impl GrainScheduler<SmallRng> {
    /// Create a new scheduler with a [`SmallRng`], seeded with the options' seed or from the OS.
    pub fn new(
        options: GrainSchedulerOptions,
        parameters: SchedulerParameters,
    ) -> Result<Self, Error> {
        let rng = match options.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self::with_rng(options, parameters, rng)
    }
}

impl<R: Rng> GrainScheduler<R> {
    /// Create a new scheduler which randomizes grains with the given random generator.
    pub fn with_rng(
        options: GrainSchedulerOptions,
        parameters: SchedulerParameters,
        rng: R,
    ) -> Result<Self, Error> {
        options.validate()?;
        parameters.validate()?;
        Ok(Self {
            options,
            parameters,
            sample_buffer: None,
            grain_pool: GrainPool::new(),
            emitting: false,
            next_grain_time: 0.0,
            stats: SchedulerStats::default(),
            rng,
        })
    }

    pub fn options(&self) -> &GrainSchedulerOptions {
        &self.options
    }

    /// Interval in seconds in which the host should call [`tick`](Self::tick).
    pub fn tick_interval(&self) -> f64 {
        self.options.tick_interval.as_secs_f64()
    }

    pub fn parameters(&self) -> &SchedulerParameters {
        &self.parameters
    }

    /// Replace all parameters. Invalid parameters get rejected and leave the current ones as
    /// they are.
    pub fn set_parameters(&mut self, parameters: SchedulerParameters) -> Result<(), Error> {
        parameters.validate()?;
        self.parameters = parameters;
        Ok(())
    }

    /// Apply a partial parameter update. Invalid updates get rejected as a whole.
    pub fn update_params(&mut self, update: SchedulerParameterUpdate) -> Result<(), Error> {
        self.set_parameters(update.apply_to(&self.parameters))
    }

    pub fn sample_buffer(&self) -> Option<&SharedSampleBuffer> {
        self.sample_buffer.as_ref()
    }

    /// Set or remove the grain source. Grains which play the old buffer get freed immediately.
    /// Removing the buffer also stops the emission.
    pub fn set_sample_buffer(&mut self, sample_buffer: Option<SharedSampleBuffer>) {
        self.grain_pool.reset();
        if sample_buffer.is_none() && self.emitting {
            log::debug!("Grain sample buffer got removed: stopping emission");
            self.emitting = false;
        }
        self.sample_buffer = sample_buffer;
    }

    /// Scheduling statistics.
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn is_emitting(&self) -> bool {
        self.emitting
    }

    /// Start time of the next continuously emitted grain.
    pub fn next_grain_time(&self) -> f64 {
        self.next_grain_time
    }

    /// Number of grains which are playing or waiting to play at the given time.
    pub fn active_grain_count(&self, now: f64) -> usize {
        self.grain_pool.pending_count(now)
    }

    /// Active grain voices, for rendering.
    pub fn grains(&self) -> impl Iterator<Item = &GrainVoice> + '_ {
        self.grain_pool.grains()
    }

    /// Start continuous emission at the given time and schedule the first grains.
    /// Does nothing when already emitting or when no sample buffer is set.
    pub fn start_emitting(&mut self, now: f64) {
        if self.emitting {
            return;
        }
        if self.sample_buffer.is_none() {
            log::debug!("Ignoring grain emission start: no sample buffer set");
            return;
        }
        self.emitting = true;
        self.next_grain_time = self.next_grain_time.max(now);
        // `now` may lie ahead of the host's time: don't reclaim grains here
        self.schedule_ahead(now);
    }

    /// Stop continuous emission. Active grains fade out over `fade_time` seconds, or stop
    /// immediately when `fade_time` is 0.
    pub fn stop_emitting(&mut self, now: f64, fade_time: f64) {
        self.emitting = false;
        if fade_time > 0.0 {
            self.grain_pool.fade_out(now, fade_time);
        } else {
            self.grain_pool.stop_all(now);
        }
    }

    /// Reclaim finished grains and, while emitting, schedule all grains which start within
    /// the look-ahead window. Returns the number of grains started in this tick.
    pub fn tick(&mut self, now: f64) -> usize {
        self.grain_pool.reclaim_finished(now);
        self.schedule_ahead(now)
    }

    /// [`tick`](Self::tick) at the clock's current time.
    pub fn tick_with_clock<C: SchedulingClock + ?Sized>(&mut self, clock: &C) -> usize {
        self.tick(clock.current_time())
    }

    fn schedule_ahead(&mut self, now: f64) -> usize {
        if !self.emitting || self.sample_buffer.is_none() {
            return 0;
        }
        if self.next_grain_time < now {
            log::debug!(
                "Grain scheduler fell behind by {:.3}s: skipping missed grains",
                now - self.next_grain_time
            );
            self.next_grain_time = now;
        }
        let schedule_until = now + self.options.look_ahead.as_secs_f64();
        let interval = 1.0 / self.parameters.grain_density;
        let mut grain_count = 0;
        while self.next_grain_time < schedule_until
            && grain_count < self.options.max_grains_per_tick
        {
            let grain = self.random_grain(0.0, 1.0);
            if self.schedule_grain(&grain, self.next_grain_time) {
                grain_count += 1;
            }
            self.next_grain_time += interval;
        }
        grain_count
    }

    /// Schedule `count` grains evenly spaced over `spread_time` seconds starting at `now`,
    /// regardless of the continuous emission state. Returns the number of started grains.
    pub fn trigger_burst(&mut self, now: f64, count: usize, spread_time: f64) -> usize {
        if self.sample_buffer.is_none() || count == 0 {
            return 0;
        }
        let spacing = spread_time.max(0.0) / count as f64;
        let mut grain_count = 0;
        for index in 0..count {
            let grain = self.random_grain(0.0, 1.0);
            if self.schedule_grain(&grain, now + index as f64 * spacing) {
                grain_count += 1;
            }
        }
        grain_count
    }

    /// Trigger a single grain for a MIDI note: the note's offset to middle C gets added to the
    /// grain pitch and the velocity scales the grain's gain. Returns true when the grain started.
    pub fn trigger_midi_note(&mut self, note: u8, velocity: u8, time: f64) -> bool {
        if self.sample_buffer.is_none() {
            return false;
        }
        let grain = self.random_grain(note_to_pitch(note) as f32, velocity_to_gain(velocity));
        self.schedule_grain(&grain, time)
    }

    fn random_grain(&mut self, pitch_offset: f32, gain_scale: f32) -> Grain {
        let parameters = &self.parameters;
        let position_offset = self.rng.random_range(-1.0_f32..=1.0);
        let pitch_offset =
            pitch_offset + parameters.pitch_random * self.rng.random_range(-1.0_f32..=1.0);
        let pan = parameters.spread * self.rng.random_range(-1.0_f32..=1.0);
        let reverse = self.rng.random::<f32>() < parameters.reverse_probability;
        Grain {
            sample_position: (parameters.sample_position
                + parameters.position_random * position_offset)
                .clamp(0.0, 1.0),
            duration: parameters.grain_size,
            pitch: parameters.pitch + pitch_offset,
            pan,
            gain: parameters.gain * gain_scale,
            shape: parameters.envelope_shape,
            reverse,
        }
    }

    fn schedule_grain(&mut self, grain: &Grain, time: f64) -> bool {
        let Some(sample_buffer) = self.sample_buffer.as_deref() else {
            return false;
        };
        match self.grain_pool.trigger(sample_buffer, grain, time) {
            GrainTriggerResult::Started { .. } => {
                self.stats.grains_scheduled += 1;
                self.stats.last_schedule_time = Some(time);
                true
            }
            GrainTriggerResult::PoolExhausted => {
                self.stats.grains_dropped += 1;
                false
            }
            GrainTriggerResult::InvalidGeometry => {
                self.stats.grains_skipped += 1;
                false
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------
