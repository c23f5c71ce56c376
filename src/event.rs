use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::{
    grain::{SchedulerParameterUpdate, SharedSampleBuffer},
    voice::{StealStrategy, VoiceMode},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Control events which get sent from a [`ControlHandle`] to an [`Engine`](crate::Engine).
///
/// Times are scheduling times in seconds. Events without a time apply at the time the engine
/// processes them.
#[derive(Clone, strum::IntoStaticStr)]
pub enum ControlEvent {
    NoteOn {
        note: u8,
        velocity: u8,
        time: Option<f64>,
    },
    NoteOff {
        note: u8,
        time: Option<f64>,
    },
    SustainOn {
        time: Option<f64>,
    },
    SustainOff {
        time: Option<f64>,
    },
    AllNotesOff {
        time: Option<f64>,
    },
    SetVoiceMode {
        mode: VoiceMode,
        time: Option<f64>,
    },
    SetStealStrategy {
        strategy: StealStrategy,
    },
    StartEmitting {
        time: Option<f64>,
    },
    StopEmitting {
        fade_time: f64,
        time: Option<f64>,
    },
    TriggerBurst {
        count: usize,
        spread_time: f64,
        time: Option<f64>,
    },
    TriggerMidiNote {
        note: u8,
        velocity: u8,
        time: Option<f64>,
    },
    UpdateParams {
        update: SchedulerParameterUpdate,
    },
    SetSampleBuffer {
        buffer: Option<SharedSampleBuffer>,
    },
}

impl ControlEvent {
    /// Scheduling time of the event, if any.
    pub fn time(&self) -> Option<f64> {
        match self {
            Self::NoteOn { time, .. }
            | Self::NoteOff { time, .. }
            | Self::SustainOn { time }
            | Self::SustainOff { time }
            | Self::AllNotesOff { time }
            | Self::SetVoiceMode { time, .. }
            | Self::StartEmitting { time }
            | Self::StopEmitting { time, .. }
            | Self::TriggerBurst { time, .. }
            | Self::TriggerMidiNote { time, .. } => *time,
            Self::SetStealStrategy { .. }
            | Self::UpdateParams { .. }
            | Self::SetSampleBuffer { .. } => None,
        }
    }

    /// Whether the engine may dispatch the event before its time, within the grain scheduler's
    /// look-ahead window. Voice state changes wait until they are due: they affect how
    /// following events get handled.
    pub(crate) fn schedules_ahead(&self) -> bool {
        !matches!(
            self,
            Self::NoteOff { .. }
                | Self::SustainOn { .. }
                | Self::SustainOff { .. }
                | Self::AllNotesOff { .. }
                | Self::SetVoiceMode { .. }
        )
    }

    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

// -------------------------------------------------------------------------------------------------

/// Lock-free control event queue, shared by an engine and its handles.
pub(crate) type ControlEventQueue = Arc<ArrayQueue<ControlEvent>>;

// -------------------------------------------------------------------------------------------------

/// A handle to control an [`Engine`](crate::Engine) from other threads.
///
/// Events get pushed into a bounded lock-free queue, which the engine drains in its `process`
/// call. Sending fails with [`Error::SendError`] when the queue is full. Panic type events
/// (all notes off and stopping the grain emission) never fail: when the queue is full, they
/// replace the oldest pending event.
#[derive(Clone)]
pub struct ControlHandle {
    queue: ControlEventQueue,
}

impl ControlHandle {
    pub(crate) fn new(queue: ControlEventQueue) -> Self {
        Self { queue }
    }

    /// Number of events that wait for processing.
    pub fn pending_event_count(&self) -> usize {
        self.queue.len()
    }

    /// Play a note at the given time or immediately.
    pub fn note_on<T: Into<Option<f64>>>(
        &self,
        note: u8,
        velocity: u8,
        time: T,
    ) -> Result<(), Error> {
        self.send(ControlEvent::NoteOn {
            note,
            velocity,
            time: time.into(),
        })
    }

    /// Release a note at the given time or immediately.
    pub fn note_off<T: Into<Option<f64>>>(&self, note: u8, time: T) -> Result<(), Error> {
        self.send(ControlEvent::NoteOff {
            note,
            time: time.into(),
        })
    }

    pub fn sustain_on<T: Into<Option<f64>>>(&self, time: T) -> Result<(), Error> {
        self.send(ControlEvent::SustainOn { time: time.into() })
    }

    pub fn sustain_off<T: Into<Option<f64>>>(&self, time: T) -> Result<(), Error> {
        self.send(ControlEvent::SustainOff { time: time.into() })
    }

    /// Stop all voices. Never fails.
    pub fn all_notes_off<T: Into<Option<f64>>>(&self, time: T) {
        self.force_send(ControlEvent::AllNotesOff { time: time.into() });
    }

    pub fn set_voice_mode<T: Into<Option<f64>>>(
        &self,
        mode: VoiceMode,
        time: T,
    ) -> Result<(), Error> {
        self.send(ControlEvent::SetVoiceMode {
            mode,
            time: time.into(),
        })
    }

    pub fn set_steal_strategy(&self, strategy: StealStrategy) -> Result<(), Error> {
        self.send(ControlEvent::SetStealStrategy { strategy })
    }

    pub fn start_emitting<T: Into<Option<f64>>>(&self, time: T) -> Result<(), Error> {
        self.send(ControlEvent::StartEmitting { time: time.into() })
    }

    /// Stop the grain emission, fading out active grains. Never fails.
    pub fn stop_emitting<T: Into<Option<f64>>>(&self, fade_time: f64, time: T) {
        self.force_send(ControlEvent::StopEmitting {
            fade_time,
            time: time.into(),
        });
    }

    pub fn trigger_burst<T: Into<Option<f64>>>(
        &self,
        count: usize,
        spread_time: f64,
        time: T,
    ) -> Result<(), Error> {
        self.send(ControlEvent::TriggerBurst {
            count,
            spread_time,
            time: time.into(),
        })
    }

    pub fn trigger_midi_note<T: Into<Option<f64>>>(
        &self,
        note: u8,
        velocity: u8,
        time: T,
    ) -> Result<(), Error> {
        self.send(ControlEvent::TriggerMidiNote {
            note,
            velocity,
            time: time.into(),
        })
    }

    /// Update grain scheduler parameters. Invalid updates get rejected and logged by the engine.
    pub fn update_params(&self, update: SchedulerParameterUpdate) -> Result<(), Error> {
        self.send(ControlEvent::UpdateParams { update })
    }

    pub fn set_sample_buffer(&self, buffer: Option<SharedSampleBuffer>) -> Result<(), Error> {
        self.send(ControlEvent::SetSampleBuffer { buffer })
    }

    /// Push an event into the queue.
    pub fn send(&self, event: ControlEvent) -> Result<(), Error> {
        self.queue
            .push(event)
            .map_err(|event| Self::control_queue_error(event.name()))
    }

    fn force_send(&self, event: ControlEvent) {
        if let Some(dropped) = self.queue.force_push(event) {
            log::warn!(
                "Control event queue is full. Dropped a pending {} event.",
                dropped.name()
            );
        }
    }

    fn control_queue_error(event_name: &str) -> Error {
        log::warn!("Control event queue is full. Failed to send a {event_name} event.");
        log::warn!("Increase the control event queue size to prevent this from happening...");
        Error::SendError("Control event queue is full".to_string())
    }
}
