//! Voice pool slots and the playback unit interface the [`VoiceAllocator`] drives.

use std::str::FromStr;

// -------------------------------------------------------------------------------------------------

mod allocator;
mod unit;

pub use allocator::{NoteOnResult, VoiceAllocator, VoiceAllocatorOptions};
pub use unit::EnvelopedVoice;

// -------------------------------------------------------------------------------------------------

/// A sound producing unit which plays one note at a time: the slot content of a voice pool.
///
/// Units get created once per pool slot by a factory and are reused for all notes that get
/// allocated to the slot. All calls carry the scheduling time the action should happen at.
pub trait PlayableUnit {
    /// Start playing the given note, retriggering the unit's envelope.
    fn note_on(&mut self, note: u8, velocity: u8, time: f64);
    /// Start the release stage of the unit's envelope.
    fn release(&mut self, time: f64);
    /// Silence the unit immediately.
    fn stop(&mut self, time: f64);
    /// Change the pitch of the playing note without retriggering.
    fn set_pitch(&mut self, note: u8, time: f64);
    /// Current output amplitude at the given time.
    fn amplitude(&self, time: f64) -> f32;

    /// Seconds after `note_on` until the unit reached its sustain stage.
    fn attack_duration(&self) -> f64 {
        0.0
    }
    /// Seconds after `release` until the unit is silent.
    fn release_duration(&self) -> f64 {
        0.0
    }
}

impl<U: PlayableUnit + ?Sized> PlayableUnit for Box<U> {
    fn note_on(&mut self, note: u8, velocity: u8, time: f64) {
        (**self).note_on(note, velocity, time)
    }
    fn release(&mut self, time: f64) {
        (**self).release(time)
    }
    fn stop(&mut self, time: f64) {
        (**self).stop(time)
    }
    fn set_pitch(&mut self, note: u8, time: f64) {
        (**self).set_pitch(note, time)
    }
    fn amplitude(&self, time: f64) -> f32 {
        (**self).amplitude(time)
    }
    fn attack_duration(&self) -> f64 {
        (**self).attack_duration()
    }
    fn release_duration(&self) -> f64 {
        (**self).release_duration()
    }
}

// -------------------------------------------------------------------------------------------------

/// Lifecycle state of a [`Voice`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    #[default]
    Idle,
    Attack,
    Sustain,
    Release,
}

// -------------------------------------------------------------------------------------------------

/// Bookkeeping for one slot in the voice pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    /// Index of the voice in the pool.
    pub slot_index: usize,
    /// Note the voice is bound to. None when idle.
    pub note: Option<u8>,
    pub velocity: u8,
    /// Scheduling time of the last note on.
    pub start_time: f64,
    /// Scheduling time the release started at. None when not releasing.
    pub release_time: Option<f64>,
    pub state: VoiceState,
    /// Allocation counter value of the last note on: lower values are older voices.
    pub age: u64,
}

impl Voice {
    /// Create a new idle voice.
    pub fn new(slot_index: usize) -> Self {
        Self {
            slot_index,
            note: None,
            velocity: 0,
            start_time: 0.0,
            release_time: None,
            state: VoiceState::Idle,
            age: 0,
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state == VoiceState::Idle
    }

    #[inline]
    pub fn is_releasing(&self) -> bool {
        self.state == VoiceState::Release
    }

    /// True when the voice is bound to the note and not yet released.
    #[inline]
    pub fn is_holding_note(&self, note: u8) -> bool {
        self.note == Some(note) && matches!(self.state, VoiceState::Attack | VoiceState::Sustain)
    }

    /// Mark voice as free.
    pub(crate) fn free(&mut self) {
        self.note = None;
        self.velocity = 0;
        self.release_time = None;
        self.state = VoiceState::Idle;
    }
}

// -------------------------------------------------------------------------------------------------

/// How notes map onto the voice pool.
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
pub enum VoiceMode {
    /// Each note gets its own voice.
    #[default]
    Poly,
    /// A single voice, retriggered by every new note.
    Mono,
    /// A single voice which glides to new notes without retriggering while held.
    Legato,
}

impl VoiceMode {
    /// Parse a mode name. Unknown names fall back to [`VoiceMode::Poly`].
    pub fn from_name(name: &str) -> Self {
        Self::from_str(name).unwrap_or_else(|_| {
            log::warn!("Unknown voice mode '{name}', falling back to 'Poly'");
            Self::default()
        })
    }
}

// -------------------------------------------------------------------------------------------------

/// Which voice gets reclaimed when a note arrives and the pool is exhausted.
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
pub enum StealStrategy {
    /// The releasing voice with the earliest release time, else the oldest playing voice.
    #[default]
    Oldest,
    /// The voice with the lowest current amplitude.
    Quietest,
    /// Cycle through the pool, regardless of voice states.
    RoundRobin,
    /// The voice playing the lowest note.
    Lowest,
    /// The voice playing the highest note.
    Highest,
}

impl StealStrategy {
    /// Parse a strategy name. Unknown names fall back to [`StealStrategy::Oldest`].
    pub fn from_name(name: &str) -> Self {
        Self::from_str(name).unwrap_or_else(|_| {
            log::warn!("Unknown voice steal strategy '{name}', falling back to 'Oldest'");
            Self::default()
        })
    }
}

// -------------------------------------------------------------------------------------------------
