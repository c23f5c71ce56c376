use super::{buffer::SampleBuffer, Grain, GrainVoice};

// -------------------------------------------------------------------------------------------------

/// Default number of grain voices in a [`GrainPool`].
pub const GRAIN_POOL_SIZE: usize = 64;

// -------------------------------------------------------------------------------------------------

/// Outcome of [`GrainPool::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrainTriggerResult {
    /// The grain got started in the given pool slot.
    Started { slot: usize },
    /// All grain voices are busy: the grain got dropped.
    PoolExhausted,
    /// The grain's position and duration leave nothing to play: the grain got skipped.
    InvalidGeometry,
}

impl GrainTriggerResult {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

// -------------------------------------------------------------------------------------------------

/// Fixed arena of [`GrainVoice`]s.
///
/// New grains go into the first inactive slot. Finished grains get reclaimed in
/// [`reclaim_finished`](Self::reclaim_finished), so no explicit cleanup of grains is needed.
pub struct GrainPool<const POOL_SIZE: usize = GRAIN_POOL_SIZE> {
    /// Pool of reusable grain voices.
    grain_pool: [GrainVoice; POOL_SIZE],
    /// Indices of currently active grains.
    active_grain_indices: Vec<usize>,
}

impl<const POOL_SIZE: usize> Default for GrainPool<POOL_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const POOL_SIZE: usize> GrainPool<POOL_SIZE> {
    pub fn new() -> Self {
        Self {
            grain_pool: [GrainVoice::new(); POOL_SIZE],
            active_grain_indices: Vec::with_capacity(POOL_SIZE),
        }
    }

    /// Number of grain voices in the pool.
    pub const fn capacity(&self) -> usize {
        POOL_SIZE
    }

    /// Number of voices which hold a grain, including grains which already finished but were
    /// not reclaimed yet.
    pub fn active_count(&self) -> usize {
        self.active_grain_indices.len()
    }

    /// Number of grains which are playing or waiting to play at the given time.
    pub fn pending_count(&self, now: f64) -> usize {
        self.grains().filter(|grain| !grain.is_finished(now)).count()
    }

    /// Active grain voices, in trigger order.
    pub fn grains(&self) -> impl Iterator<Item = &GrainVoice> + '_ {
        self.active_grain_indices
            .iter()
            .map(|index| &self.grain_pool[*index])
    }

    /// Grain voice at the given slot, if it's active.
    pub fn grain(&self, slot: usize) -> Option<&GrainVoice> {
        self.grain_pool.get(slot).filter(|grain| grain.is_active())
    }

    /// Start a grain in a free slot.
    pub fn trigger(
        &mut self,
        buffer: &dyn SampleBuffer,
        grain: &Grain,
        start_time: f64,
    ) -> GrainTriggerResult {
        let Some(slot) = self.grain_pool.iter().position(|grain| !grain.is_active()) else {
            log::debug!("All {POOL_SIZE} grain voices are busy: dropping grain at {start_time}s");
            return GrainTriggerResult::PoolExhausted;
        };
        if !self.grain_pool[slot].trigger(buffer, grain, start_time) {
            return GrainTriggerResult::InvalidGeometry;
        }
        self.active_grain_indices.push(slot);
        GrainTriggerResult::Started { slot }
    }

    /// Free all grains which finished playing at the given time. Returns the number of
    /// reclaimed grains.
    pub fn reclaim_finished(&mut self, now: f64) -> usize {
        let count_before = self.active_grain_indices.len();
        let grain_pool = &mut self.grain_pool;
        self.active_grain_indices.retain(|index| {
            let grain = &mut grain_pool[*index];
            if grain.is_finished(now) {
                grain.reclaim();
                false
            } else {
                true
            }
        });
        count_before - self.active_grain_indices.len()
    }

    /// Stop all active grains at the given time.
    pub fn stop_all(&mut self, when: f64) {
        for index in &self.active_grain_indices {
            self.grain_pool[*index].stop(when);
        }
    }

    /// Fade out all active grains over `fade_time` seconds, starting at `time`.
    pub fn fade_out(&mut self, time: f64, fade_time: f64) {
        for index in &self.active_grain_indices {
            self.grain_pool[*index].fade_out(time, fade_time);
        }
    }

    /// Immediately free all grains.
    pub fn reset(&mut self) {
        for index in self.active_grain_indices.drain(..) {
            self.grain_pool[index].reclaim();
        }
    }
}

// -------------------------------------------------------------------------------------------------
