//! Error types for the tuner protocol and controller.

use thiserror::Error;

use crate::types::{RequestKind, TunerState};

/// Errors raised while decoding backend output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line contained only whitespace.
    #[error("Empty line")]
    EmptyLine,

    /// First token does not name a known response.
    #[error("Unknown response: {0}")]
    UnknownResponse(String),

    /// A required argument is missing.
    #[error("Missing argument '{argument}' for '{response}'")]
    MissingArgument {
        response: &'static str,
        argument: &'static str,
    },

    /// An argument could not be parsed.
    #[error("Invalid argument for '{response}': {value}")]
    InvalidArgument {
        response: &'static str,
        value: String,
    },
}

/// Typed failure delivered to a caller of the tuner controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunerError {
    /// The command channel cannot reach the backend.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend went away while the request was pending.
    #[error("Backend lost")]
    BackendLost,

    /// The backend reported a failure for this request.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Frequency {frequency} kHz out of range ({min}-{max} kHz)")]
    OutOfRange { frequency: u32, min: u32, max: u32 },

    /// An exclusive operation is already in flight.
    #[error("Tuner busy: {0} pending")]
    Busy(RequestKind),

    /// A newer request of the same kind replaced this one.
    #[error("Superseded by a newer request")]
    Superseded,

    #[error("Timed out waiting for {0}")]
    Timeout(RequestKind),

    /// The tuner was killed while the request was pending.
    #[error("Killed")]
    Killed,

    #[error("Tuner already enabled")]
    AlreadyEnabled,

    #[error("Tuner not ready (state: {0})")]
    NotReady(TunerState),

    /// The tuner is dead and accepts no further commands.
    #[error("Tuner is dead")]
    Dead,

    #[error("Internal error: {0}")]
    Internal(String),
}
