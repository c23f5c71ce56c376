use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by voxgrain.
///
/// Note that real-time entry points (note and grain triggers, scheduler ticks) never return
/// errors. They drop or clamp invalid input and report it via logs, result values or counters.
/// Errors are only raised when configuring components or when sending control events.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    ParameterError(String),
    SampleBufferError(String),
    SendError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::SampleBufferError(str) => write!(f, "Invalid sample buffer: {str}"),
            Self::SendError(str) => write!(f, "Failed to send control event: {str}"),
        }
    }
}
