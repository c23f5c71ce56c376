use std::collections::VecDeque;

// -------------------------------------------------------------------------------------------------

/// A scheduling time tagged event.
pub(crate) trait Event {
    fn time(&self) -> f64;

    /// Whether the event may get processed before its time, within a look-ahead window.
    fn schedules_ahead(&self) -> bool {
        true
    }
}

// -------------------------------------------------------------------------------------------------

/// Manage processing of scheduling time tagged events in e.g. the [`Engine`](crate::Engine).
///
/// Note: When adding events via `insert_event`, events will be sorted ascending by time, which
/// is necessary for the ordered event processing. Events with equal times keep their insertion
/// order. If events are added in other ways, ensure that the sorting doesn't get broken!
pub(crate) trait EventProcessor {
    /// The time tagged event.
    type Event: Event;

    /// Time of the next pending event, if any.
    fn next_event_time(&self) -> Option<f64> {
        self.events().front().map(|e| e.time())
    }

    /// Add a new event for processing while keeping event list sorted by ascending time.
    fn insert_event(&mut self, event: Self::Event) {
        let events = self.events_mut();
        let time = event.time();
        let insert_pos = events
            .make_contiguous()
            .partition_point(|e| e.time() <= time);
        events.insert(insert_pos, event);
    }

    /// Process all pending events that are due at the given time. Events which schedule ahead
    /// are due `look_ahead` seconds before their time. Processing stops at the first event that
    /// is not due, so events never get processed out of order.
    /// Returns the number of processed events.
    fn process_events(&mut self, time: f64, look_ahead: f64) -> usize {
        let is_due = |event: &Self::Event| {
            if event.schedules_ahead() {
                event.time() <= time + look_ahead
            } else {
                event.time() <= time
            }
        };
        let mut event_count = 0;
        while self.events().front().is_some_and(is_due) {
            let Some(event) = self.events_mut().pop_front() else {
                break;
            };
            self.process_event(event);
            event_count += 1;
        }
        event_count
    }

    /// Access to the event deque.
    fn events(&self) -> &VecDeque<Self::Event>;
    /// Mutable access to the event deque.
    fn events_mut(&mut self) -> &mut VecDeque<Self::Event>;

    /// Process a single due event.
    fn process_event(&mut self, event: Self::Event);
}

// -------------------------------------------------------------------------------------------------
