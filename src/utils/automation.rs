//! Timestamped parameter automation: the "automatable parameter" side of a scheduling clock.

// -------------------------------------------------------------------------------------------------

/// A parameter which can be automated ahead of time with scheduled value changes.
///
/// Semantics follow Web Audio's `AudioParam`: ramps run from the end of the previous event to the
/// ramp's own time, value curves are interpolated linearly and hold their last value.
///
/// Scheduling ramps does not allocate, unless the timeline's event list needs to grow. Value
/// curves copy their values.
pub trait AutomationParam {
    /// Jump to `value` at `time`.
    fn set_value_at_time(&mut self, value: f32, time: f64);
    /// Ramp linearly from the previous event's value to `value`, reaching it at `end_time`.
    fn linear_ramp_to_value_at_time(&mut self, value: f32, end_time: f64);
    /// Ramp exponentially from the previous event's value to `value`, reaching it at `end_time`.
    /// Both values must be positive, else the ramp holds its start value.
    fn exponential_ramp_to_value_at_time(&mut self, value: f32, end_time: f64);
    /// Ramp logarithmically from the previous event's value to `value`, reaching it at
    /// `end_time`: `from + (to - from) * log10(1 + 9 * t)` for `t` in `0..=1`.
    fn logarithmic_ramp_to_value_at_time(&mut self, value: f32, end_time: f64);
    /// Interpolate through `values`, spread evenly over `duration` seconds from `start_time`.
    fn set_value_curve_at_time(&mut self, values: &[f32], start_time: f64, duration: f64);
    /// Remove all events which start at or after `time`.
    fn cancel_scheduled_values(&mut self, time: f64);
    /// Remove all events after `time` and hold the value the parameter has at `time`.
    fn cancel_and_hold_at_time(&mut self, time: f64);
    /// Evaluate the automation at the given time.
    fn value_at_time(&self, time: f64) -> f32;
}

// -------------------------------------------------------------------------------------------------

/// A single scheduled change in an [`AutomationTimeline`].
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationEvent {
    SetValue {
        value: f32,
        time: f64,
    },
    LinearRamp {
        value: f32,
        time: f64,
    },
    ExponentialRamp {
        value: f32,
        time: f64,
    },
    LogarithmicRamp {
        value: f32,
        time: f64,
    },
    ValueCurve {
        values: Box<[f32]>,
        time: f64,
        duration: f64,
        /// Time after which the curve holds its value. Equals `time + duration` unless the
        /// curve got cut by `cancel_and_hold_at_time`.
        hold_time: f64,
    },
}

impl AutomationEvent {
    /// Sort key: the event's time for set values and curves, the end time for ramps.
    pub fn time(&self) -> f64 {
        match self {
            Self::SetValue { time, .. }
            | Self::LinearRamp { time, .. }
            | Self::ExponentialRamp { time, .. }
            | Self::LogarithmicRamp { time, .. }
            | Self::ValueCurve { time, .. } => *time,
        }
    }

    /// Time at which the event's influence ends.
    pub fn end_time(&self) -> f64 {
        match self {
            Self::ValueCurve { hold_time, .. } => *hold_time,
            _ => self.time(),
        }
    }

    /// The value the event settles at.
    pub fn end_value(&self) -> f32 {
        match self {
            Self::SetValue { value, .. }
            | Self::LinearRamp { value, .. }
            | Self::ExponentialRamp { value, .. }
            | Self::LogarithmicRamp { value, .. } => *value,
            Self::ValueCurve {
                values,
                time,
                duration,
                hold_time,
            } => curve_value(values, *time, *duration, *hold_time),
        }
    }
}

#[inline]
fn curve_value(values: &[f32], start_time: f64, duration: f64, time: f64) -> f32 {
    debug_assert!(!values.is_empty(), "Curves should not be empty");
    let count = values.len();
    if count == 1 || duration <= 0.0 || time >= start_time + duration {
        return values[count - 1];
    }
    if time <= start_time {
        return values[0];
    }
    let position = (time - start_time) / duration * (count - 1) as f64;
    let index = position.floor() as usize;
    if index >= count - 1 {
        values[count - 1]
    } else {
        let fraction = (position - index as f64) as f32;
        values[index] + (values[index + 1] - values[index]) * fraction
    }
}

#[inline]
fn linear_value(v0: f32, t0: f64, v1: f32, t1: f64, time: f64) -> f32 {
    if t1 <= t0 {
        return v1;
    }
    let fraction = ((time - t0) / (t1 - t0)).clamp(0.0, 1.0) as f32;
    v0 + (v1 - v0) * fraction
}

#[inline]
fn exponential_value(v0: f32, t0: f64, v1: f32, t1: f64, time: f64) -> f32 {
    if v0 == 0.0 || v1 == 0.0 || v0.is_sign_negative() != v1.is_sign_negative() {
        // undefined: hold the start value until the ramp ends
        return v0;
    }
    if t1 <= t0 {
        return v1;
    }
    let fraction = ((time - t0) / (t1 - t0)).clamp(0.0, 1.0);
    (v0 as f64 * (v1 as f64 / v0 as f64).powf(fraction)) as f32
}

#[inline]
fn logarithmic_value(v0: f32, t0: f64, v1: f32, t1: f64, time: f64) -> f32 {
    if t1 <= t0 {
        return v1;
    }
    let fraction = ((time - t0) / (t1 - t0)).clamp(0.0, 1.0);
    v0 + (v1 - v0) * (1.0 + 9.0 * fraction).log10() as f32
}

// -------------------------------------------------------------------------------------------------

/// In-memory [`AutomationParam`] implementation: a time ordered list of automation events.
///
/// Events with equal times are evaluated in insertion order. Ramps which have no preceding event
/// start at time 0 with the timeline's default value.
#[derive(Debug, Clone)]
pub struct AutomationTimeline {
    default_value: f32,
    events: Vec<AutomationEvent>,
}

impl Default for AutomationTimeline {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AutomationTimeline {
    const DEFAULT_CAPACITY: usize = 16;

    /// Create a new, empty timeline which evaluates to `default_value`.
    pub fn new(default_value: f32) -> Self {
        Self {
            default_value,
            events: Vec::with_capacity(Self::DEFAULT_CAPACITY),
        }
    }

    /// Value of the timeline before the first event.
    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Currently scheduled events, sorted by time.
    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    /// Remove all events.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Drop events which no longer influence values at or after `time`.
    ///
    /// The last completed event is kept as anchor for following ramps, converted to a plain
    /// value change. Values before `time` are no longer valid afterwards.
    pub fn discard_events_before(&mut self, time: f64) {
        let completed = self.events.partition_point(|e| e.end_time() <= time);
        if completed == 0 {
            return;
        }
        let anchor = &self.events[completed - 1];
        let anchor = AutomationEvent::SetValue {
            value: anchor.end_value(),
            time: anchor.end_time(),
        };
        self.events.drain(..completed - 1);
        self.events[0] = anchor;
    }

    fn insert(&mut self, event: AutomationEvent) {
        let time = event.time();
        let position = self.events.partition_point(|e| e.time() <= time);
        self.events.insert(position, event);
    }
}

impl AutomationParam for AutomationTimeline {
    fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(AutomationEvent::SetValue { value, time });
    }

    fn linear_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        self.insert(AutomationEvent::LinearRamp {
            value,
            time: end_time,
        });
    }

    fn exponential_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        self.insert(AutomationEvent::ExponentialRamp {
            value,
            time: end_time,
        });
    }

    fn logarithmic_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        self.insert(AutomationEvent::LogarithmicRamp {
            value,
            time: end_time,
        });
    }

    fn set_value_curve_at_time(&mut self, values: &[f32], start_time: f64, duration: f64) {
        if values.is_empty() {
            log::warn!("Ignoring empty automation value curve at {start_time}s");
            return;
        }
        let duration = duration.max(0.0);
        self.insert(AutomationEvent::ValueCurve {
            values: values.into(),
            time: start_time,
            duration,
            hold_time: start_time + duration,
        });
    }

    fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    fn cancel_and_hold_at_time(&mut self, time: f64) {
        let value = self.value_at_time(time);
        let index = self.events.partition_point(|e| e.time() <= time);
        let cut_ramp = self.events.get(index).cloned();
        self.events.truncate(index);
        if let Some(AutomationEvent::ValueCurve { hold_time, .. }) = self.events.last_mut() {
            if *hold_time > time {
                *hold_time = time;
            }
        }
        // replace a ramp in progress with a ramp ending at the hold time: this keeps the
        // ramp's shape up to the hold time
        match cut_ramp {
            Some(AutomationEvent::LinearRamp { .. }) => {
                self.events.push(AutomationEvent::LinearRamp { value, time });
            }
            Some(AutomationEvent::ExponentialRamp { .. }) => {
                self.events.push(AutomationEvent::ExponentialRamp { value, time });
            }
            Some(AutomationEvent::LogarithmicRamp { .. }) => {
                // the log shape can't be cut: ramp linearly through the held value instead
                self.events.push(AutomationEvent::LinearRamp { value, time });
            }
            _ => {
                self.events.push(AutomationEvent::SetValue { value, time });
            }
        }
    }

    fn value_at_time(&self, time: f64) -> f32 {
        let index = self.events.partition_point(|e| e.time() <= time);
        let previous = index.checked_sub(1).map(|i| &self.events[i]);

        // inside a running value curve
        if let Some(AutomationEvent::ValueCurve {
            values,
            time: start_time,
            duration,
            hold_time,
        }) = previous
        {
            if time < *hold_time {
                return curve_value(values, *start_time, *duration, time);
            }
        }

        // inside a running ramp
        let (start_time, start_value) = previous
            .map(|e| (e.end_time(), e.end_value()))
            .unwrap_or((0.0, self.default_value));
        match self.events.get(index) {
            Some(AutomationEvent::LinearRamp {
                value,
                time: end_time,
            }) => {
                return linear_value(start_value, start_time, *value, *end_time, time);
            }
            Some(AutomationEvent::ExponentialRamp {
                value,
                time: end_time,
            }) => {
                return exponential_value(start_value, start_time, *value, *end_time, time);
            }
            Some(AutomationEvent::LogarithmicRamp {
                value,
                time: end_time,
            }) => {
                return logarithmic_value(start_value, start_time, *value, *end_time, time);
            }
            _ => {}
        }

        // holding the last event's value
        start_value
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn default_value_before_events() {
        let mut param = AutomationTimeline::new(0.5);
        assert_eq!(param.value_at_time(0.0), 0.5);
        param.set_value_at_time(1.0, 1.0);
        assert_eq!(param.value_at_time(0.999), 0.5);
        assert_eq!(param.value_at_time(1.0), 1.0);
        assert_eq!(param.value_at_time(10.0), 1.0);
    }

    #[test]
    fn linear_ramp() {
        let mut param = AutomationTimeline::default();
        param.set_value_at_time(0.0, 1.0);
        param.linear_ramp_to_value_at_time(1.0, 2.0);
        assert_eq!(param.value_at_time(1.0), 0.0);
        assert!((param.value_at_time(1.5) - 0.5).abs() < EPSILON);
        assert_eq!(param.value_at_time(2.0), 1.0);
        assert_eq!(param.value_at_time(3.0), 1.0);
    }

    #[test]
    fn exponential_ramp() {
        let mut param = AutomationTimeline::default();
        param.set_value_at_time(0.01, 0.0);
        param.exponential_ramp_to_value_at_time(1.0, 1.0);
        // geometric mean at the midpoint
        assert!((param.value_at_time(0.5) - 0.1).abs() < EPSILON);
        assert!((param.value_at_time(1.0) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn exponential_ramp_to_zero_holds() {
        let mut param = AutomationTimeline::default();
        param.set_value_at_time(1.0, 0.0);
        param.exponential_ramp_to_value_at_time(0.0, 1.0);
        assert_eq!(param.value_at_time(0.5), 1.0);
        assert!(!param.value_at_time(0.99).is_nan());
        assert_eq!(param.value_at_time(1.0), 0.0);
    }

    #[test]
    fn value_curve() {
        let mut param = AutomationTimeline::default();
        param.set_value_curve_at_time(&[0.0, 1.0, 0.0], 1.0, 2.0);
        assert_eq!(param.value_at_time(0.5), 0.0);
        assert!((param.value_at_time(1.5) - 0.5).abs() < EPSILON);
        assert!((param.value_at_time(2.0) - 1.0).abs() < EPSILON);
        assert!((param.value_at_time(2.5) - 0.5).abs() < EPSILON);
        assert_eq!(param.value_at_time(4.0), 0.0);
    }

    #[test]
    fn ramp_after_curve_starts_at_curve_end() {
        let mut param = AutomationTimeline::default();
        param.set_value_curve_at_time(&[0.0, 1.0], 0.0, 1.0);
        param.linear_ramp_to_value_at_time(0.0, 2.0);
        assert!((param.value_at_time(1.5) - 0.5).abs() < EPSILON);
    }

    #[test]
    fn cancel_scheduled_values() {
        let mut param = AutomationTimeline::default();
        param.set_value_at_time(0.0, 0.0);
        param.linear_ramp_to_value_at_time(1.0, 1.0);
        param.set_value_at_time(0.25, 2.0);
        param.cancel_scheduled_values(0.5);
        assert_eq!(param.events().len(), 1);
        assert_eq!(param.value_at_time(2.0), 0.0);
    }

    #[test]
    fn cancel_and_hold_inside_ramp() {
        let mut param = AutomationTimeline::default();
        param.set_value_at_time(0.0, 0.0);
        param.linear_ramp_to_value_at_time(1.0, 1.0);
        param.cancel_and_hold_at_time(0.25);
        // ramp shape is kept up to the hold time
        assert!((param.value_at_time(0.125) - 0.125).abs() < EPSILON);
        assert!((param.value_at_time(0.25) - 0.25).abs() < EPSILON);
        assert!((param.value_at_time(5.0) - 0.25).abs() < EPSILON);
    }

    #[test]
    fn cancel_and_hold_inside_curve() {
        let mut param = AutomationTimeline::default();
        param.set_value_curve_at_time(&[0.0, 1.0], 0.0, 1.0);
        param.cancel_and_hold_at_time(0.5);
        assert!((param.value_at_time(0.25) - 0.25).abs() < EPSILON);
        assert!((param.value_at_time(0.75) - 0.5).abs() < EPSILON);
    }

    #[test]
    fn discard_events_before() {
        let mut param = AutomationTimeline::default();
        param.set_value_at_time(0.0, 0.0);
        param.linear_ramp_to_value_at_time(1.0, 1.0);
        param.set_value_at_time(0.5, 2.0);
        param.linear_ramp_to_value_at_time(0.0, 3.0);
        param.discard_events_before(2.5);
        assert_eq!(param.events().len(), 2);
        assert!((param.value_at_time(2.5) - 0.25).abs() < EPSILON);
        assert_eq!(param.value_at_time(3.0), 0.0);
    }

    #[test]
    fn logarithmic_ramp() {
        let mut param = AutomationTimeline::default();
        param.set_value_at_time(1.0, 1.0);
        param.logarithmic_ramp_to_value_at_time(0.0, 2.0);
        assert_eq!(param.value_at_time(1.0), 1.0);
        // log10(1 + 9 * 0.5) of the way down at the half
        let expected = 1.0 - 5.5_f32.log10();
        assert!((param.value_at_time(1.5) - expected).abs() < EPSILON);
        assert_eq!(param.value_at_time(2.0), 0.0);
        assert_eq!(param.value_at_time(3.0), 0.0);
        assert_eq!(param.events().len(), 2);
    }

    #[test]
    fn cancel_and_hold_inside_logarithmic_ramp() {
        let mut param = AutomationTimeline::default();
        param.set_value_at_time(0.0, 0.0);
        param.logarithmic_ramp_to_value_at_time(1.0, 1.0);
        let held = param.value_at_time(0.5);
        param.cancel_and_hold_at_time(0.5);
        assert!((param.value_at_time(0.5) - held).abs() < EPSILON);
        assert!((param.value_at_time(2.0) - held).abs() < EPSILON);
        param.discard_events_before(0.75);
        assert_eq!(param.events().len(), 1);
        assert!((param.value_at_time(0.75) - held).abs() < EPSILON);
    }
}
