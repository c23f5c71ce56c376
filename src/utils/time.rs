//! Monotonic scheduling clocks, measured in seconds.

use std::{cell::Cell, time::Duration};

// -------------------------------------------------------------------------------------------------

pub type SampleTime = u64;

// -------------------------------------------------------------------------------------------------

/// A monotonic clock which tells the current scheduling time in seconds.
///
/// The scheduling core never reads wall-clock time itself: hosts either pass explicit
/// timestamps or hand out a clock to the `*_with_clock` convenience functions.
pub trait SchedulingClock {
    /// Current time in seconds. Must never decrease.
    fn current_time(&self) -> f64;
}

// -------------------------------------------------------------------------------------------------

/// A clock that measures time in terms of sample frames at a fixed sample rate.
///
/// This is the sample-accurate transport an audio callback drives: advance it by the number of
/// frames rendered in each block.
#[derive(Debug, Clone)]
pub struct SampleTimeClock {
    sample_rate: u32,
    sample_time: Cell<SampleTime>,
}

impl SampleTimeClock {
    /// Create a new SampleTimeClock with the given sample rate, starting at frame 0.
    pub fn new(sample_rate: u32) -> Self {
        assert!(sample_rate > 0, "Invalid sample rate");
        Self {
            sample_rate,
            sample_time: Cell::new(0),
        }
    }

    /// Convert a duration to sample frames with the given sample rate.
    pub fn duration_to_sample_time(duration: Duration, sample_rate: u32) -> SampleTime {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        (duration.as_secs_f64() * sample_rate as f64) as SampleTime
    }

    /// Convert sample frames to seconds with the given sample rate.
    pub fn sample_time_to_seconds(sample_time: SampleTime, sample_rate: u32) -> f64 {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        sample_time as f64 / sample_rate as f64
    }

    /// The clock's sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current position in sample frames.
    pub fn sample_time(&self) -> SampleTime {
        self.sample_time.get()
    }

    /// Advance the clock by the given number of sample frames.
    pub fn advance(&self, frames: u64) {
        self.sample_time
            .set(self.sample_time.get().saturating_add(frames));
    }
}

impl SchedulingClock for SampleTimeClock {
    fn current_time(&self) -> f64 {
        Self::sample_time_to_seconds(self.sample_time.get(), self.sample_rate)
    }
}

// -------------------------------------------------------------------------------------------------

/// A manually driven clock for offline scheduling and tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Cell<f64>,
}

impl ManualClock {
    pub fn new(time: f64) -> Self {
        Self {
            time: Cell::new(time),
        }
    }

    /// Move the clock to the given time. Times in the past are ignored to keep the clock
    /// monotonic.
    pub fn set_time(&self, time: f64) {
        if time > self.time.get() {
            self.time.set(time);
        }
    }

    /// Advance the clock by the given amount of seconds.
    pub fn advance(&self, seconds: f64) {
        self.set_time(self.time.get() + seconds.max(0.0));
    }
}

impl SchedulingClock for ManualClock {
    fn current_time(&self) -> f64 {
        self.time.get()
    }
}

// -------------------------------------------------------------------------------------------------
