#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod engine;
mod envelope;
mod error;
mod event;
mod grain;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use engine::Engine;
pub use event::{ControlEvent, ControlHandle};

pub use envelope::{
    AdsrPlusEnvelope, EnvelopeCurve, EnvelopeParameters, EnvelopeStage, ENVELOPE_FLOOR,
};

pub use voice::{
    EnvelopedVoice, NoteOnResult, PlayableUnit, StealStrategy, Voice, VoiceAllocator,
    VoiceAllocatorOptions, VoiceMode, VoiceState,
};

pub use grain::{
    Grain, GrainEnvelopeShape, GrainPool, GrainScheduler, GrainSchedulerOptions,
    GrainTriggerResult, GrainVoice, MemorySampleBuffer, SampleBuffer, SchedulerParameterUpdate,
    SchedulerParameters, SchedulerStats, SharedSampleBuffer, GRAIN_POOL_SIZE,
};

// public mods
pub mod utils;
