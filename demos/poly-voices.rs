//! An example showcasing polyphonic voice allocation, voice stealing, the sustain pedal and
//! legato glides, driven by a simple MIDI like note sequence.
//!
//! Usage:
//!   cargo run --example poly-voices

use std::time::Duration;

use voxgrain::{
    utils::time::{ManualClock, SchedulingClock},
    EnvelopeCurve, EnvelopeParameters, EnvelopedVoice, Engine, Error, GrainScheduler,
    GrainSchedulerOptions, SchedulerParameters, StealStrategy, VoiceAllocator,
    VoiceAllocatorOptions, VoiceMode,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const MAX_VOICES: usize = 4;
const STEAL_STRATEGY: StealStrategy = StealStrategy::Oldest;

// AHDSR Envelope parameters
const ATTACK_MS: u64 = 20;
const DECAY_MS: u64 = 200;
const SUSTAIN_LEVEL: f32 = 0.6;
const RELEASE_MS: u64 = 400;
const GLIDE_MS: u64 = 120;

/// Chords of a ii-V-I progression in C major, one chord per beat.
const CHORDS: [[u8; 4]; 3] = [[62, 65, 69, 72], [55, 59, 62, 65], [60, 64, 67, 71]];
const BEAT_SECONDS: f64 = 0.75;

// -------------------------------------------------------------------------------------------------

/// Log voice states and unit amplitudes at the given time.
fn log_voices(engine: &Engine<EnvelopedVoice>, now: f64) {
    let voices = engine.voices();
    let states = voices
        .voices()
        .iter()
        .zip(voices.units())
        .map(|(voice, unit)| match voice.note {
            Some(note) => format!("{note}:{:?}@{:.2}", voice.state, unit.gain_at(now)),
            None => "-".to_string(),
        })
        .collect::<Vec<_>>();
    log::info!(
        "{now:.2}s: {} active [{}] held: {:?} sustained: {:?}",
        voices.active_voice_count(),
        states.join(", "),
        voices.held_notes().collect::<Vec<_>>(),
        voices.sustained_notes()
    );
}

/// Run the engine from the clock's time until `end`, logging voices every 250ms.
fn run_until(engine: &mut Engine<EnvelopedVoice>, clock: &ManualClock, end: f64) {
    let tick_interval = engine.grains().tick_interval();
    let mut next_log = clock.current_time();
    while clock.current_time() < end {
        let now = clock.current_time();
        engine.process_with_clock(clock);
        if now >= next_log {
            log_voices(engine, now);
            next_log += 0.25;
        }
        clock.advance(tick_interval);
    }
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .expect("Failed to set logger");

    let mut envelope = EnvelopeParameters::new(
        Duration::from_millis(ATTACK_MS),
        Duration::from_millis(DECAY_MS),
        SUSTAIN_LEVEL,
        Duration::from_millis(RELEASE_MS),
    )?;
    envelope.set_release_curve(EnvelopeCurve::Exponential);

    let voices = VoiceAllocator::new(
        VoiceAllocatorOptions::default()
            .max_voices(MAX_VOICES)
            .steal_strategy(STEAL_STRATEGY),
        |_| {
            EnvelopedVoice::new(envelope.clone())
                .with_glide_time(Duration::from_millis(GLIDE_MS))
        },
    )?;
    // Voices only: the grain scheduler never gets a sample buffer in this example.
    let grains = GrainScheduler::new(
        GrainSchedulerOptions::default(),
        SchedulerParameters::default(),
    )?;
    let mut engine = Engine::new(voices, grains, 256)?;
    let handle = engine.handle();
    let clock = ManualClock::new(0.0);

    log::info!("Playing chords with {MAX_VOICES} voices and sustain pedal...");
    handle.sustain_on(0.0)?;
    for (index, chord) in CHORDS.iter().enumerate() {
        let start = index as f64 * BEAT_SECONDS;
        for note in chord {
            handle.note_on(*note, 100, start)?;
            handle.note_off(*note, start + BEAT_SECONDS * 0.5)?;
        }
        // lift and press the pedal again on every chord change
        handle.sustain_off(start + BEAT_SECONDS * 0.95)?;
        handle.sustain_on(start + BEAT_SECONDS)?;
    }
    handle.sustain_off(CHORDS.len() as f64 * BEAT_SECONDS)?;
    run_until(&mut engine, &clock, 3.0);

    log::info!("Stealing voices with a 6 note cluster...");
    for (index, note) in (48..54).enumerate() {
        handle.note_on(note, 90, 3.0 + index as f64 * 0.05)?;
    }
    run_until(&mut engine, &clock, 3.5);
    handle.all_notes_off(None);
    run_until(&mut engine, &clock, 4.0);

    log::info!("Gliding a legato line...");
    handle.set_voice_mode(VoiceMode::Legato, 4.0)?;
    let line = [60, 62, 64, 65, 67];
    for (index, note) in line.iter().enumerate() {
        let time = 4.0 + index as f64 * 0.3;
        handle.note_on(*note, 100, time)?;
        // overlap notes, so they glide
        handle.note_off(*note, time + 0.4)?;
    }
    run_until(&mut engine, &clock, 6.5);
    Ok(())
}
