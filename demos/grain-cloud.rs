//! An example showcasing continuous grain emission and grain bursts, rendered offline.
//!
//! The example renders a synthetic sample buffer through the grain scheduler's grain voices
//! while sweeping the grain position and density, and logs the output level.
//!
//! Usage:
//!   cargo run --example grain-cloud

use std::{f32::consts::PI, sync::Arc, thread};

use voxgrain::{
    utils::time::{SampleTimeClock, SchedulingClock},
    EnvelopeParameters, EnvelopedVoice, Engine, Error, GrainEnvelopeShape, GrainScheduler,
    GrainSchedulerOptions, GrainVoice, MemorySampleBuffer, SampleBuffer,
    SchedulerParameterUpdate, SchedulerParameters, VoiceAllocator, VoiceAllocatorOptions,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

// Grain parameter consts (tweak as needed!)

const SAMPLE_RATE: u32 = 44100;
const RENDER_SECONDS: f64 = 6.0;

const GRAIN_SIZE: f64 = 0.08; // 1ms - 10s
const GRAIN_DENSITY: f64 = 30.0; // grains per second
const GRAIN_POSITION_RANDOM: f32 = 0.1; // 0.0 = no spray, 1.0 = full buffer
const GRAIN_PITCH_RANDOM: f32 = 0.3; // semitones
const GRAIN_SPREAD: f32 = 0.5; // 0.0 = center, 1.0 = full left/right
const GRAIN_SHAPE: GrainEnvelopeShape = GrainEnvelopeShape::Hann;

// -------------------------------------------------------------------------------------------------

/// Create a stereo buffer with a rising sine sweep, so grain positions are audible as pitch.
fn sweep_buffer(duration: f64) -> Result<MemorySampleBuffer, Error> {
    let frame_count = (duration * SAMPLE_RATE as f64) as usize;
    let mut samples = Vec::with_capacity(frame_count * 2);
    let mut phase = 0.0_f32;
    for frame in 0..frame_count {
        let progress = frame as f32 / frame_count as f32;
        let frequency = 110.0 + 770.0 * progress;
        phase = (phase + 2.0 * PI * frequency / SAMPLE_RATE as f32) % (2.0 * PI);
        let value = phase.sin() * 0.5;
        samples.extend_from_slice(&[value, value]);
    }
    MemorySampleBuffer::new(samples, 2, SAMPLE_RATE)
}

/// Mix a single grain voice into the given interleaved stereo output block.
fn render_grain(
    grain: &GrainVoice,
    buffer: &MemorySampleBuffer,
    output: &mut [f32],
    block_start: f64,
) {
    for (index, frame) in output.chunks_exact_mut(2).enumerate() {
        let time = block_start + index as f64 / SAMPLE_RATE as f64;
        let Some(position) = grain.frame_position_at(time) else {
            continue;
        };
        let Some(samples) = buffer.frame(position as usize) else {
            continue;
        };
        let gain = grain.gain_at(time);
        let pan = grain.pan();
        frame[0] += samples[0] * gain * (1.0 - pan.max(0.0));
        frame[1] += samples[1] * gain * (1.0 + pan.min(0.0));
    }
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .expect("Failed to set logger");

    let buffer = sweep_buffer(4.0)?;
    log::info!(
        "Created a {:.1}s sample buffer with {} channels",
        buffer.duration(),
        buffer.channel_count()
    );

    // Grains only: the voice allocator stays unused in this example.
    let voices = VoiceAllocator::new(VoiceAllocatorOptions::default().max_voices(1), |_| {
        EnvelopedVoice::new(EnvelopeParameters::default())
    })?;
    let options = GrainSchedulerOptions::default().seed(0x5eed);
    let parameters = SchedulerParameters {
        grain_size: GRAIN_SIZE,
        grain_density: GRAIN_DENSITY,
        sample_position: 0.0,
        position_random: GRAIN_POSITION_RANDOM,
        pitch_random: GRAIN_PITCH_RANDOM,
        spread: GRAIN_SPREAD,
        envelope_shape: GRAIN_SHAPE,
        ..SchedulerParameters::default()
    };
    let grains = GrainScheduler::new(options, parameters)?;
    let queue_size = Engine::<EnvelopedVoice>::DEFAULT_EVENT_QUEUE_SIZE;
    let mut engine = Engine::new(voices, grains, queue_size)?;

    let handle = engine.handle();
    handle.set_sample_buffer(Some(Arc::new(buffer.clone())))?;
    handle.start_emitting(0.0)?;

    // Schedule a final burst and the fade out from another thread. Events carry their time,
    // so they can be sent ahead.
    let control_handle = handle.clone();
    let control_thread = thread::spawn(move || -> Result<(), Error> {
        control_handle.trigger_burst(12, 0.3, 4.5)?;
        control_handle.stop_emitting(0.5, 5.0);
        Ok(())
    });
    match control_thread.join() {
        Ok(result) => result?,
        Err(_) => log::error!("Control thread panicked"),
    }

    // Render in blocks of one tick interval
    let clock = SampleTimeClock::new(SAMPLE_RATE);
    let block_frames =
        SampleTimeClock::duration_to_sample_time(options.tick_interval, SAMPLE_RATE);
    let mut output = vec![0.0_f32; block_frames as usize * 2];
    let mut peak = 0.0_f32;
    let mut next_report = 0.0;
    while clock.current_time() < RENDER_SECONDS {
        let now = clock.current_time();
        if now < 4.5 {
            // sweep position and density through the buffer
            let progress = (now / 4.5) as f32;
            handle.update_params(
                SchedulerParameterUpdate::new()
                    .sample_position(progress * 0.9)
                    .grain_density(GRAIN_DENSITY * (1.0 + progress as f64)),
            )?;
        }
        engine.process_with_clock(&clock);

        output.fill(0.0);
        for grain in engine.grains().grains() {
            render_grain(grain, &buffer, &mut output, now);
        }
        peak = output.iter().fold(peak, |peak, sample| peak.max(sample.abs()));

        if now >= next_report {
            let stats = engine.grains().stats();
            log::info!(
                "{now:.2}s: {} active grains, {} scheduled, {} dropped, peak {peak:.2}",
                engine.grains().active_grain_count(now),
                stats.grains_scheduled,
                stats.grains_dropped
            );
            peak = 0.0;
            next_report += 0.5;
        }
        clock.advance(block_frames);
    }
    Ok(())
}
