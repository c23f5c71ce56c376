use crate::Error;

use super::{PlayableUnit, StealStrategy, Voice, VoiceMode, VoiceState};

// -------------------------------------------------------------------------------------------------

/// Options to create a [`VoiceAllocator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceAllocatorOptions {
    /// Number of voices in the pool. Fixed for the allocator's lifetime. By default 8.
    pub max_voices: usize,
    /// Note to voice mapping. By default [`VoiceMode::Poly`].
    pub voice_mode: VoiceMode,
    /// Which voice to reclaim when the pool is exhausted. By default [`StealStrategy::Oldest`].
    pub steal_strategy: StealStrategy,
    /// When disabled, notes which find no idle voice get dropped. By default true.
    pub stealing_enabled: bool,
}

impl Default for VoiceAllocatorOptions {
    fn default() -> Self {
        Self {
            max_voices: 8,
            voice_mode: VoiceMode::default(),
            steal_strategy: StealStrategy::default(),
            stealing_enabled: true,
        }
    }
}

impl VoiceAllocatorOptions {
    /// Upper limit for `max_voices`.
    pub const MAX_VOICES: usize = 256;

    pub fn max_voices(mut self, max_voices: usize) -> Self {
        self.max_voices = max_voices;
        self
    }

    pub fn voice_mode(mut self, voice_mode: VoiceMode) -> Self {
        self.voice_mode = voice_mode;
        self
    }

    pub fn steal_strategy(mut self, steal_strategy: StealStrategy) -> Self {
        self.steal_strategy = steal_strategy;
        self
    }

    pub fn stealing_enabled(mut self, enabled: bool) -> Self {
        self.stealing_enabled = enabled;
        self
    }

    /// Validate all parameters. Returns Error::ParameterError on errors.
    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=Self::MAX_VOICES).contains(&self.max_voices) {
            return Err(Error::ParameterError(format!(
                "voice allocator 'max_voices' value is '{}', expected a value in range [1, {}]",
                self.max_voices,
                Self::MAX_VOICES
            )));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Outcome of [`VoiceAllocator::note_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOnResult {
    /// The note got an idle voice.
    Allocated { slot: usize },
    /// The note took over a playing voice. `stolen_note` is the note the voice played before.
    Stolen {
        slot: usize,
        stolen_note: Option<u8>,
    },
    /// The note was already playing and its voice got restarted.
    Retriggered { slot: usize },
    /// The held mono voice changed its pitch without retriggering.
    Legato { slot: usize },
    /// No voice was available and stealing is disabled.
    Dropped,
}

impl NoteOnResult {
    /// Slot index of the voice which plays the note, if any.
    pub fn slot(&self) -> Option<usize> {
        match *self {
            Self::Allocated { slot }
            | Self::Stolen { slot, .. }
            | Self::Retriggered { slot }
            | Self::Legato { slot } => Some(slot),
            Self::Dropped => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped)
    }
}

// -------------------------------------------------------------------------------------------------

/// Maps incoming notes onto a fixed pool of [`PlayableUnit`]s.
///
/// Supports polyphonic, monophonic and legato voice modes, configurable voice stealing and a
/// sustain pedal. Voice states are advanced lazily: state transitions which depend on the units'
/// envelope durations get applied in [`update`](Self::update), which is also called on each
/// `note_on`.
///
/// All operations are allocation free after construction.
pub struct VoiceAllocator<U: PlayableUnit> {
    voices: Vec<Voice>,
    units: Vec<U>,
    voice_mode: VoiceMode,
    steal_strategy: StealStrategy,
    stealing_enabled: bool,
    age_counter: u64,
    round_robin_index: usize,
    sustain_held: bool,
    sustained_notes: Vec<u8>,
    note_stack: Vec<(u8, u8)>,
    dropped_notes: u64,
}

impl<U: PlayableUnit> VoiceAllocator<U> {
    /// Create a new allocator. `unit_factory` gets called once per pool slot with the slot index.
    pub fn new<F>(options: VoiceAllocatorOptions, unit_factory: F) -> Result<Self, Error>
    where
        F: FnMut(usize) -> U,
    {
        options.validate()?;
        let voices = (0..options.max_voices).map(Voice::new).collect();
        let units = (0..options.max_voices).map(unit_factory).collect();
        // a note can only be held once
        let sustained_notes = Vec::with_capacity(u8::MAX as usize + 1);
        let note_stack = Vec::with_capacity(u8::MAX as usize + 1);
        Ok(Self {
            voices,
            units,
            voice_mode: options.voice_mode,
            steal_strategy: options.steal_strategy,
            stealing_enabled: options.stealing_enabled,
            age_counter: 0,
            round_robin_index: 0,
            sustain_held: false,
            sustained_notes,
            note_stack,
            dropped_notes: 0,
        })
    }

    /// Size of the voice pool.
    pub fn max_voices(&self) -> usize {
        self.voices.len()
    }

    /// Voice slot states.
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Playback units, indexed by slot.
    pub fn units(&self) -> &[U] {
        &self.units
    }
    pub fn unit(&self, slot: usize) -> Option<&U> {
        self.units.get(slot)
    }
    pub fn unit_mut(&mut self, slot: usize) -> Option<&mut U> {
        self.units.get_mut(slot)
    }

    /// Number of voices which are not idle.
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_idle()).count()
    }

    pub fn idle_voice_count(&self) -> usize {
        self.voices.len() - self.active_voice_count()
    }

    /// Number of notes which got dropped because no voice was available.
    pub fn dropped_note_count(&self) -> u64 {
        self.dropped_notes
    }

    pub fn voice_mode(&self) -> VoiceMode {
        self.voice_mode
    }

    /// Change the voice mode. Switching modes silences all playing voices.
    pub fn set_voice_mode(&mut self, voice_mode: VoiceMode, time: f64) {
        if self.voice_mode != voice_mode {
            self.all_notes_off(time);
            self.voice_mode = voice_mode;
        }
    }

    pub fn steal_strategy(&self) -> StealStrategy {
        self.steal_strategy
    }
    pub fn set_steal_strategy(&mut self, steal_strategy: StealStrategy) {
        self.steal_strategy = steal_strategy;
    }

    pub fn stealing_enabled(&self) -> bool {
        self.stealing_enabled
    }
    pub fn set_stealing_enabled(&mut self, enabled: bool) {
        self.stealing_enabled = enabled;
    }

    pub fn is_sustain_held(&self) -> bool {
        self.sustain_held
    }

    /// Notes which got released while the sustain pedal was held.
    pub fn sustained_notes(&self) -> &[u8] {
        &self.sustained_notes
    }

    /// Notes which are currently pressed in mono and legato modes, oldest first.
    pub fn held_notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.note_stack.iter().map(|(note, _)| *note)
    }

    /// Start playing a note.
    pub fn note_on(&mut self, note: u8, velocity: u8, time: f64) -> NoteOnResult {
        self.update(time);
        // pressing a note again takes it out of the sustain pedal
        self.sustained_notes.retain(|n| *n != note);
        match self.voice_mode {
            VoiceMode::Poly => self.poly_note_on(note, velocity, time),
            VoiceMode::Mono | VoiceMode::Legato => self.mono_note_on(note, velocity, time),
        }
    }

    /// Release a note. Returns false when the note is not playing.
    ///
    /// While the sustain pedal is held, the note off gets recorded and applied when the pedal is
    /// lifted. This always returns true, whether or not the note is playing.
    pub fn note_off(&mut self, note: u8, time: f64) -> bool {
        if self.sustain_held {
            if !self.sustained_notes.contains(&note) {
                self.sustained_notes.push(note);
            }
            return true;
        }
        match self.voice_mode {
            VoiceMode::Poly => self.poly_note_off(note, time),
            VoiceMode::Mono | VoiceMode::Legato => self.mono_note_off(note, time),
        }
    }

    /// Hold the sustain pedal: note offs are deferred until [`sustain_off`](Self::sustain_off).
    pub fn sustain_on(&mut self) {
        self.sustain_held = true;
    }

    /// Lift the sustain pedal and release all notes which got released while it was held.
    pub fn sustain_off(&mut self, time: f64) {
        self.sustain_held = false;
        let mut notes = std::mem::take(&mut self.sustained_notes);
        for note in notes.iter().copied() {
            self.note_off(note, time);
        }
        notes.clear();
        self.sustained_notes = notes;
    }

    /// Immediately stop all voices. Also lifts the sustain pedal and forgets all held notes.
    pub fn all_notes_off(&mut self, time: f64) {
        for (voice, unit) in self.voices.iter_mut().zip(self.units.iter_mut()) {
            if !voice.is_idle() {
                unit.stop(time);
                voice.free();
            }
        }
        self.note_stack.clear();
        self.sustained_notes.clear();
        self.sustain_held = false;
    }

    /// Advance voice states to the given time: voices which passed their attack phase move to
    /// sustain, voices which finished their release become idle.
    pub fn update(&mut self, time: f64) {
        for (voice, unit) in self.voices.iter_mut().zip(self.units.iter()) {
            match voice.state {
                VoiceState::Attack => {
                    if time >= voice.start_time + unit.attack_duration() {
                        voice.state = VoiceState::Sustain;
                    }
                }
                VoiceState::Release => {
                    let release_time = voice.release_time.unwrap_or(voice.start_time);
                    if time >= release_time + unit.release_duration() {
                        voice.free();
                    }
                }
                VoiceState::Idle | VoiceState::Sustain => {}
            }
        }
    }

    fn poly_note_on(&mut self, note: u8, velocity: u8, time: f64) -> NoteOnResult {
        if let Some(slot) = self.voices.iter().position(|v| v.is_holding_note(note)) {
            self.start_voice(slot, note, velocity, time);
            return NoteOnResult::Retriggered { slot };
        }
        if let Some(slot) = self.voices.iter().position(|v| v.is_idle()) {
            self.start_voice(slot, note, velocity, time);
            return NoteOnResult::Allocated { slot };
        }
        if !self.stealing_enabled {
            self.dropped_notes += 1;
            log::warn!("All {} voices are busy: dropping note {note}", self.voices.len());
            return NoteOnResult::Dropped;
        }
        let slot = self.steal_candidate(time);
        let stolen_note = self.voices[slot].note;
        log::debug!(
            "Stealing voice #{slot} playing note {stolen_note:?} for note {note} ({})",
            self.steal_strategy
        );
        self.units[slot].stop(time);
        self.start_voice(slot, note, velocity, time);
        NoteOnResult::Stolen { slot, stolen_note }
    }

    fn poly_note_off(&mut self, note: u8, time: f64) -> bool {
        let mut released = false;
        for (voice, unit) in self.voices.iter_mut().zip(self.units.iter_mut()) {
            if voice.is_holding_note(note) {
                unit.release(time);
                voice.state = VoiceState::Release;
                voice.release_time = Some(time);
                released = true;
            }
        }
        released
    }

    fn mono_note_on(&mut self, note: u8, velocity: u8, time: f64) -> NoteOnResult {
        const SLOT: usize = 0;
        self.note_stack.retain(|(n, _)| *n != note);
        self.note_stack.push((note, velocity));

        let voice = &mut self.voices[SLOT];
        let is_sounding = matches!(voice.state, VoiceState::Attack | VoiceState::Sustain);
        if self.voice_mode == VoiceMode::Legato && is_sounding {
            voice.note = Some(note);
            voice.velocity = velocity;
            self.units[SLOT].set_pitch(note, time);
            NoteOnResult::Legato { slot: SLOT }
        } else if voice.is_idle() {
            self.start_voice(SLOT, note, velocity, time);
            NoteOnResult::Allocated { slot: SLOT }
        } else {
            self.start_voice(SLOT, note, velocity, time);
            NoteOnResult::Retriggered { slot: SLOT }
        }
    }

    fn mono_note_off(&mut self, note: u8, time: f64) -> bool {
        const SLOT: usize = 0;
        let Some(position) = self.note_stack.iter().position(|(n, _)| *n == note) else {
            return false;
        };
        self.note_stack.remove(position);
        if !self.voices[SLOT].is_holding_note(note) {
            // a note which got shadowed by a newer one
            return true;
        }
        if let Some(&(next_note, next_velocity)) = self.note_stack.last() {
            // fall back to the most recent still pressed note
            if self.voice_mode == VoiceMode::Legato {
                let voice = &mut self.voices[SLOT];
                voice.note = Some(next_note);
                voice.velocity = next_velocity;
                self.units[SLOT].set_pitch(next_note, time);
            } else {
                self.start_voice(SLOT, next_note, next_velocity, time);
            }
        } else {
            let voice = &mut self.voices[SLOT];
            voice.state = VoiceState::Release;
            voice.release_time = Some(time);
            self.units[SLOT].release(time);
        }
        true
    }

    fn start_voice(&mut self, slot: usize, note: u8, velocity: u8, time: f64) {
        self.age_counter += 1;
        let voice = &mut self.voices[slot];
        voice.note = Some(note);
        voice.velocity = velocity;
        voice.start_time = time;
        voice.release_time = None;
        voice.state = VoiceState::Attack;
        voice.age = self.age_counter;
        self.units[slot].note_on(note, velocity, time);
    }

    /// Pick a voice to steal. Only called when no voice is idle.
    fn steal_candidate(&mut self, time: f64) -> usize {
        match self.steal_strategy {
            StealStrategy::Oldest => {
                // Prioritize:
                //   a) Longest releasing voice (earliest release time)
                //   b) Oldest active voice (smallest age)
                let mut candidate = 0;
                let mut earliest_release: Option<f64> = None;
                let mut oldest_age: Option<u64> = None;
                for (index, voice) in self.voices.iter().enumerate() {
                    if let Some(release_time) = voice.release_time.filter(|_| voice.is_releasing())
                    {
                        if earliest_release.is_none_or(|earliest| release_time < earliest) {
                            earliest_release = Some(release_time);
                            candidate = index;
                        }
                    } else if earliest_release.is_none()
                        && oldest_age.is_none_or(|oldest| voice.age < oldest)
                    {
                        oldest_age = Some(voice.age);
                        candidate = index;
                    }
                }
                candidate
            }
            StealStrategy::Quietest => self
                .units
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.amplitude(time).total_cmp(&b.amplitude(time)))
                .map(|(index, _)| index)
                .unwrap_or(0),
            StealStrategy::RoundRobin => {
                let candidate = self.round_robin_index % self.voices.len();
                self.round_robin_index = (candidate + 1) % self.voices.len();
                candidate
            }
            StealStrategy::Lowest => self
                .voices
                .iter()
                .min_by_key(|v| v.note)
                .map(|v| v.slot_index)
                .unwrap_or(0),
            StealStrategy::Highest => self
                .voices
                .iter()
                .min_by_key(|v| std::cmp::Reverse(v.note))
                .map(|v| v.slot_index)
                .unwrap_or(0),
        }
    }
}

// -------------------------------------------------------------------------------------------------
