//! Shared definitions for the fmradio tuner service.
//!
//! This crate defines the typed vocabulary spoken between the tuner
//! controller and a vendor backend, plus the line protocol used by the
//! backend process.
//!
//! # Wire Format
//!
//! ```text
//! controller -> backend      backend -> controller
//! enable                     power 1
//! setfreq 94500              freq 94500
//! rssi                       rssi -62
//! seekhw -1                  seek 89100 1
//! ```
//!
//! Every line is a single command or response; responses carry no request
//! identifier and arrive in the order the hardware produced them.
//!
//! # Example
//!
//! ```rust
//! use fmradio_protocol::{decode_response, encode_command, BackendCommand, BackendEvent};
//!
//! assert_eq!(encode_command(&BackendCommand::Tune(94500)), "setfreq 94500");
//! assert_eq!(
//!     decode_response("freq 94500").unwrap(),
//!     BackendEvent::FrequencySet(94500)
//! );
//! ```
//!
//! # Band Plans
//!
//! [`band::BandRegion`] describes the frequency range and channel step of
//! the regional FM bands and is used to reject out-of-range tuning.

pub mod band;
pub mod codec;
pub mod error;
pub mod types;

pub use band::BandRegion;
pub use codec::{decode_response, encode_command, MAX_LINE_LENGTH};
pub use error::{ProtocolError, TunerError};
pub use types::{
    BackendCommand, BackendEvent, MuteState, RequestKind, SeekDirection, TunerState,
};
