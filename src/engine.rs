use std::{collections::VecDeque, sync::Arc};

use crossbeam_queue::ArrayQueue;
use rand::{rngs::SmallRng, Rng};

use crate::{
    event::{ControlEvent, ControlEventQueue, ControlHandle},
    grain::GrainScheduler,
    utils::{
        event::{Event, EventProcessor},
        time::SchedulingClock,
    },
    voice::{PlayableUnit, VoiceAllocator},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// A [`ControlEvent`] with a resolved scheduling time.
pub(crate) struct TimedControlEvent {
    time: f64,
    event: ControlEvent,
}

impl Event for TimedControlEvent {
    fn time(&self) -> f64 {
        self.time
    }
    fn schedules_ahead(&self) -> bool {
        self.event.schedules_ahead()
    }
}

// -------------------------------------------------------------------------------------------------

/// Runs a [`VoiceAllocator`] and a [`GrainScheduler`] on a single scheduling thread.
///
/// Other threads control the engine via [`ControlHandle`]s, which push [`ControlEvent`]s into a
/// bounded lock-free queue. The host calls [`process`](Self::process) in regular intervals,
/// ideally every [`GrainScheduler::tick_interval`] seconds. Each call:
///
/// - drains the control queue: events without a time, or with a time in the past, apply at
///   `now`. Note ons and grain events within the grain scheduler's look-ahead window get
///   dispatched early with their exact time. Note offs, sustain pedal, all notes off and voice
///   mode changes get dispatched once they are due. Events are dispatched in time order, so
///   pending events hold back all later ones.
/// - advances the voice states to `now`.
/// - ticks the grain scheduler.
///
/// With the `assert-allocs` feature, processing asserts that no memory gets allocated.
pub struct Engine<U: PlayableUnit, R: Rng = SmallRng> {
    voices: VoiceAllocator<U>,
    grains: GrainScheduler<R>,
    event_queue: ControlEventQueue,
    events: VecDeque<TimedControlEvent>,
    look_ahead: f64,
}

impl<U: PlayableUnit, R: Rng> Engine<U, R> {
    /// Default size of the control event queue.
    pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 1024;

    /// Create a new engine with a control queue which holds up to `event_queue_size` events.
    pub fn new(
        voices: VoiceAllocator<U>,
        grains: GrainScheduler<R>,
        event_queue_size: usize,
    ) -> Result<Self, Error> {
        if event_queue_size == 0 {
            return Err(Error::ParameterError(
                "engine 'event_queue_size' must be > 0".to_string(),
            ));
        }
        let event_queue = Arc::new(ArrayQueue::new(event_queue_size));
        let events = VecDeque::with_capacity(event_queue_size);
        let look_ahead = grains.options().look_ahead.as_secs_f64();
        Ok(Self {
            voices,
            grains,
            event_queue,
            events,
            look_ahead,
        })
    }

    /// Create a new handle to control this engine. Handles can be cloned and sent to other
    /// threads.
    pub fn handle(&self) -> ControlHandle {
        ControlHandle::new(Arc::clone(&self.event_queue))
    }

    pub fn voices(&self) -> &VoiceAllocator<U> {
        &self.voices
    }
    pub fn voices_mut(&mut self) -> &mut VoiceAllocator<U> {
        &mut self.voices
    }

    pub fn grains(&self) -> &GrainScheduler<R> {
        &self.grains
    }
    pub fn grains_mut(&mut self) -> &mut GrainScheduler<R> {
        &mut self.grains
    }

    /// Number of received events which wait for their scheduling time.
    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }

    /// Process control events and advance voices and grains to the given time.
    /// Returns the number of dispatched control events.
    pub fn process(&mut self, now: f64) -> usize {
        Self::assert_no_alloc(|| {
            while let Some(event) = self.event_queue.pop() {
                let time = event.time().map_or(now, |time| time.max(now));
                if self.events.len() == self.events.capacity() {
                    log::warn!("Pending control event list is full. Growing it...");
                    let additional = self.events.len().max(16);
                    Self::permit_alloc(|| self.events.reserve(additional));
                }
                self.insert_event(TimedControlEvent { time, event });
            }
            let event_count = self.process_events(now, self.look_ahead);
            self.voices.update(now);
            self.grains.tick(now);
            event_count
        })
    }

    /// [`process`](Self::process) at the clock's current time.
    pub fn process_with_clock<C: SchedulingClock + ?Sized>(&mut self, clock: &C) -> usize {
        self.process(clock.current_time())
    }

    fn assert_no_alloc<T, F: FnOnce() -> T>(func: F) -> T {
        #[cfg(feature = "assert-allocs")]
        return assert_no_alloc::assert_no_alloc::<T, F>(func);

        #[cfg(not(feature = "assert-allocs"))]
        return func();
    }

    #[inline]
    fn permit_alloc<T, F: FnOnce() -> T>(func: F) -> T {
        #[cfg(feature = "assert-allocs")]
        return assert_no_alloc::permit_alloc::<T, F>(func);

        #[cfg(not(feature = "assert-allocs"))]
        return func();
    }
}

impl<U: PlayableUnit, R: Rng> EventProcessor for Engine<U, R> {
    type Event = TimedControlEvent;

    fn events(&self) -> &VecDeque<Self::Event> {
        &self.events
    }
    fn events_mut(&mut self) -> &mut VecDeque<Self::Event> {
        &mut self.events
    }

    fn process_event(&mut self, event: Self::Event) {
        let time = event.time;
        match event.event {
            ControlEvent::NoteOn { note, velocity, .. } => {
                self.voices.note_on(note, velocity, time);
            }
            ControlEvent::NoteOff { note, .. } => {
                if !self.voices.note_off(note, time) {
                    log::debug!("Ignoring note off for note {note}: note is not playing");
                }
            }
            ControlEvent::SustainOn { .. } => self.voices.sustain_on(),
            ControlEvent::SustainOff { .. } => self.voices.sustain_off(time),
            ControlEvent::AllNotesOff { .. } => self.voices.all_notes_off(time),
            ControlEvent::SetVoiceMode { mode, .. } => self.voices.set_voice_mode(mode, time),
            ControlEvent::SetStealStrategy { strategy } => {
                self.voices.set_steal_strategy(strategy)
            }
            ControlEvent::StartEmitting { .. } => self.grains.start_emitting(time),
            ControlEvent::StopEmitting { fade_time, .. } => {
                self.grains.stop_emitting(time, fade_time)
            }
            ControlEvent::TriggerBurst {
                count,
                spread_time,
                ..
            } => {
                self.grains.trigger_burst(time, count, spread_time);
            }
            ControlEvent::TriggerMidiNote { note, velocity, .. } => {
                self.grains.trigger_midi_note(note, velocity, time);
            }
            ControlEvent::UpdateParams { update } => {
                if let Err(err) = self.grains.update_params(update) {
                    log::warn!("Ignoring grain parameter update: {err}");
                }
            }
            ControlEvent::SetSampleBuffer { buffer } => {
                // releasing the old buffer may deallocate it
                Self::permit_alloc(|| self.grains.set_sample_buffer(buffer));
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{
        envelope::{EnvelopeCurve, EnvelopeParameters, ENVELOPE_FLOOR},
        grain::{
            GrainSchedulerOptions, MemorySampleBuffer, SchedulerParameterUpdate,
            SchedulerParameters,
        },
        utils::{automation::AutomationEvent, time::ManualClock},
        voice::{EnvelopedVoice, VoiceAllocatorOptions, VoiceState},
    };

    fn engine(event_queue_size: usize) -> Result<Engine<EnvelopedVoice>, Box<Error>> {
        let voices = VoiceAllocator::new(VoiceAllocatorOptions::default().max_voices(4), |_| {
            EnvelopedVoice::new(EnvelopeParameters::default())
        })?;
        let grains = GrainScheduler::new(
            GrainSchedulerOptions::default().seed(0x1234),
            SchedulerParameters::default(),
        )?;
        Ok(Engine::new(voices, grains, event_queue_size)?)
    }

    #[test]
    fn queue_size_validation() -> Result<(), Box<Error>> {
        assert!(engine(0).is_err());
        assert!(engine(1).is_ok());
        Ok(())
    }

    #[test]
    fn handle_drives_voices() -> Result<(), Box<Error>> {
        let mut engine = engine(16)?;
        let handle = engine.handle();

        handle.note_on(60, 100, None)?;
        assert_eq!(handle.pending_event_count(), 1);
        assert_eq!(engine.process(0.0), 1);
        assert_eq!(handle.pending_event_count(), 0);
        assert_eq!(engine.voices().active_voice_count(), 1);
        assert_eq!(engine.voices().voices()[0].state, VoiceState::Attack);

        engine.process(0.1);
        assert_eq!(engine.voices().voices()[0].state, VoiceState::Sustain);

        // note offs wait until they are due
        handle.note_off(60, 0.5)?;
        assert_eq!(engine.process(0.2), 0);
        assert_eq!(engine.process(0.45), 0);
        assert_eq!(engine.pending_event_count(), 1);
        assert_eq!(engine.voices().voices()[0].state, VoiceState::Sustain);

        assert_eq!(engine.process(0.5), 1);
        assert_eq!(engine.pending_event_count(), 0);
        let voice = &engine.voices().voices()[0];
        assert_eq!(voice.state, VoiceState::Release);
        assert_eq!(voice.release_time, Some(0.5));

        // release time is 300ms
        engine.process(0.85);
        assert_eq!(engine.voices().active_voice_count(), 0);
        Ok(())
    }

    #[test]
    fn events_get_processed_in_time_order() -> Result<(), Box<Error>> {
        let mut engine = engine(16)?;
        let handle = engine.handle();
        handle.note_off(60, 0.02)?;
        handle.note_on(60, 100, 0.01)?;
        handle.note_on(64, 100, 0.03)?;
        // the note on gets scheduled ahead, the note off holds back the later note on
        assert_eq!(engine.process(0.0), 1);
        assert_eq!(engine.voices().voices()[0].start_time, 0.01);
        assert_eq!(engine.voices().active_voice_count(), 1);
        assert_eq!(engine.process(0.02), 2);
        let voices = engine.voices().voices();
        assert_eq!(voices[0].state, VoiceState::Release);
        assert_eq!(voices[0].release_time, Some(0.02));
        assert_eq!(voices[1].note, Some(64));
        assert_eq!(voices[1].start_time, 0.03);
        Ok(())
    }

    #[test]
    fn sustain_pedal_applies_at_its_time() -> Result<(), Box<Error>> {
        let mut engine = engine(16)?;
        let handle = engine.handle();
        handle.note_on(60, 100, 0.0)?;
        engine.process(0.0);

        handle.sustain_on(0.5)?;
        engine.process(0.45);
        assert!(!engine.voices().is_sustain_held());

        // a note off before the pedal goes down releases the note
        handle.note_off(60, 0.46)?;
        engine.process(0.46);
        assert!(!engine.voices().is_sustain_held());
        assert!(engine.voices().sustained_notes().is_empty());
        let voice = &engine.voices().voices()[0];
        assert_eq!(voice.state, VoiceState::Release);
        assert_eq!(voice.release_time, Some(0.46));

        engine.process(0.5);
        assert!(engine.voices().is_sustain_held());
        Ok(())
    }

    #[test]
    fn logarithmic_envelopes() -> Result<(), Box<Error>> {
        let mut parameters = EnvelopeParameters::default();
        parameters.set_attack_curve(EnvelopeCurve::Logarithmic);
        parameters.set_release_curve(EnvelopeCurve::Logarithmic);
        let voices = VoiceAllocator::new(VoiceAllocatorOptions::default().max_voices(2), |_| {
            EnvelopedVoice::new(parameters.clone())
        })?;
        let grains = GrainScheduler::new(
            GrainSchedulerOptions::default(),
            SchedulerParameters::default(),
        )?;
        let mut engine = Engine::new(voices, grains, 16)?;
        let handle = engine.handle();

        let attack_time = parameters.attack_time().as_secs_f64();
        let release_time = parameters.release_time().as_secs_f64();
        let mut time = 0.0;
        for _ in 0..100 {
            handle.note_on(60, 127, time)?;
            handle.note_off(60, time + 1.0)?;
            engine.process(time);
            engine.process(time + 1.0);

            let unit = &engine.voices().units()[0];
            let amplitude = unit.amplitude_automation();
            // ramps get evaluated analytically instead of being sampled into value curves
            assert!(amplitude.events().len() <= 8, "events {:?}", amplitude.events());
            assert!(!amplitude
                .events()
                .iter()
                .any(|e| matches!(e, AutomationEvent::ValueCurve { .. })));

            let peak = unit.gain_at(time + attack_time);
            let half_attack = unit.gain_at(time + attack_time / 2.0);
            let expected = ENVELOPE_FLOOR + (peak - ENVELOPE_FLOOR) * 5.5_f32.log10();
            assert!((half_attack - expected).abs() < 1e-3, "{half_attack} != {expected}");
            let released = unit.gain_at(time + 1.0 + release_time);
            assert!((released - ENVELOPE_FLOOR).abs() < 1e-3);

            // free the voice for the next note
            engine.process(time + 1.5);
            assert_eq!(engine.voices().active_voice_count(), 0);
            time += 2.0;
        }
        Ok(())
    }

    #[test]
    fn past_events_apply_now() -> Result<(), Box<Error>> {
        let mut engine = engine(16)?;
        let handle = engine.handle();
        handle.note_on(64, 100, 0.25)?;
        engine.process(1.0);
        let voice = &engine.voices().voices()[0];
        assert_eq!(voice.note, Some(64));
        assert_eq!(voice.start_time, 1.0);
        Ok(())
    }

    #[test]
    fn full_queue() -> Result<(), Box<Error>> {
        let mut engine = engine(2)?;
        let handle = engine.handle();
        handle.note_on(60, 100, None)?;
        handle.note_on(61, 100, None)?;
        assert!(matches!(
            handle.note_on(62, 100, None),
            Err(Error::SendError(_))
        ));
        // panic events replace the oldest event
        handle.all_notes_off(None);
        assert_eq!(handle.pending_event_count(), 2);
        assert_eq!(engine.process(0.0), 2);
        assert_eq!(engine.voices().active_voice_count(), 0);
        Ok(())
    }

    #[test]
    fn handles_are_sendable() -> Result<(), Box<Error>> {
        let mut engine = engine(128)?;
        let workers = (0..4)
            .map(|index| {
                let handle = engine.handle();
                thread::spawn(move || handle.note_on(60 + index, 100, None))
            })
            .collect::<Vec<_>>();
        for worker in workers {
            assert!(worker.join().is_ok_and(|result| result.is_ok()));
        }
        assert_eq!(engine.process(0.0), 4);
        assert_eq!(engine.voices().active_voice_count(), 4);
        Ok(())
    }

    #[test]
    fn handle_drives_grains() -> Result<(), Box<Error>> {
        let mut engine = engine(16)?;
        let handle = engine.handle();
        let buffer = MemorySampleBuffer::silence(2.0, 2, 1000)?;

        // no buffer: starting is a no-op
        handle.start_emitting(None)?;
        engine.process(0.0);
        assert!(!engine.grains().is_emitting());

        handle.set_sample_buffer(Some(Arc::new(buffer)))?;
        handle.update_params(SchedulerParameterUpdate::new().grain_density(40.0))?;
        // invalid updates get rejected as a whole
        handle.update_params(
            SchedulerParameterUpdate::new()
                .grain_density(20.0)
                .grain_size(100.0),
        )?;
        handle.start_emitting(None)?;
        let clock = ManualClock::new(0.0);
        while clock.current_time() < 1.0 {
            engine.process_with_clock(&clock);
            clock.advance(0.025);
        }
        assert!(engine.grains().is_emitting());
        assert_eq!(engine.grains().parameters().grain_density, 40.0);
        let stats = engine.grains().stats();
        assert!(stats.grains_scheduled >= 40, "scheduled {stats:?}");

        handle.stop_emitting(0.0, None);
        engine.process(1.0);
        assert!(!engine.grains().is_emitting());
        // grains within the look-ahead window never start
        assert_eq!(engine.grains().active_grain_count(1.1), 0);

        handle.trigger_burst(4, 0.1, 2.0)?;
        handle.trigger_midi_note(72, 127, 2.0)?;
        engine.process(2.0);
        assert_eq!(engine.grains().stats().grains_scheduled, stats.grains_scheduled + 5);
        Ok(())
    }
}
