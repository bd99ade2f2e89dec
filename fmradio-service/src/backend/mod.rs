//! Tuner backend abstraction.
//!
//! A backend translates abstract tuner operations into the vendor protocol.
//! Every operation only dispatches the command; the result arrives later as a
//! [`BackendEvent`] on the receiver returned when the backend was started.
//!
//! Implementations:
//! - [`QualcommBackend`]: drives the `fmbin` helper process over a
//!   [`CommandChannel`](crate::channel::CommandChannel)
//! - [`EmulatedBackend`]: in-process tuner with a fixed station table

pub mod arch;
mod emulated;
mod qualcomm;

use async_trait::async_trait;
use thiserror::Error;

use fmradio_protocol::{BackendCommand, MuteState, SeekDirection};

use crate::channel::ChannelError;

pub use arch::{determine_arch, host_abis, Arch};
pub use emulated::{default_stations, EmulatedBackend, EmulatedStation};
pub use qualcomm::QualcommBackend;

/// Backend selection errors.
#[derive(Error, Debug)]
pub enum BackendError {
    /// None of the supported ABIs has a backend build.
    #[error("Unsupported architecture: {0:?}")]
    UnsupportedArchitecture(Vec<String>),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Capability set of a tuner backend.
#[async_trait]
pub trait TunerBackend: Send {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    async fn power_on(&mut self) -> Result<(), ChannelError>;

    async fn power_off(&mut self) -> Result<(), ChannelError>;

    /// Tune to `khz` directly. The hardware reports off-band values as errors.
    async fn tune(&mut self, khz: u32) -> Result<(), ChannelError>;

    async fn seek(&mut self, direction: SeekDirection) -> Result<(), ChannelError>;

    async fn search(&mut self) -> Result<(), ChannelError>;

    async fn set_mute(&mut self, state: MuteState) -> Result<(), ChannelError>;

    async fn set_stereo(&mut self, enabled: bool) -> Result<(), ChannelError>;

    async fn get_rssi(&mut self) -> Result<(), ChannelError>;

    /// Release the backend. Pending events may be lost.
    async fn close(&mut self);

    /// Dispatch a typed command to the matching operation.
    async fn execute(&mut self, command: &BackendCommand) -> Result<(), ChannelError> {
        match *command {
            BackendCommand::PowerOn => self.power_on().await,
            BackendCommand::PowerOff => self.power_off().await,
            BackendCommand::Tune(khz) => self.tune(khz).await,
            BackendCommand::Seek(direction) => self.seek(direction).await,
            BackendCommand::Search => self.search().await,
            BackendCommand::SetMute(state) => self.set_mute(state).await,
            BackendCommand::SetStereo(enabled) => self.set_stereo(enabled).await,
            BackendCommand::GetRssi => self.get_rssi().await,
            BackendCommand::Exit => {
                self.close().await;
                Ok(())
            }
        }
    }
}
