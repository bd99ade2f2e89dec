//! Tuner control.
//!
//! The controller runs as a single task that owns the backend, the
//! configuration and the pending request table. Callers talk to it through a
//! cloneable [`TunerController`] handle.

mod configuration;
mod controller;
mod pending;

pub use configuration::{Configuration, ConfigurationStore};
pub use controller::{Collaborators, ControllerStatus, SeekResult, TunerController};
pub use pending::{Claim, Completion, Outcome, PendingRequest, PendingTable};

use std::time::Duration;

use fmradio_protocol::{BandRegion, RequestKind};

/// Bounded waits for backend answers.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub power_on: Duration,
    pub power_off: Duration,
    pub tune: Duration,
    pub seek: Duration,
    pub search: Duration,
    pub mute: Duration,
    pub stereo: Duration,
    pub rssi: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            power_on: Duration::from_secs(5),
            power_off: Duration::from_secs(3),
            tune: Duration::from_secs(3),
            seek: Duration::from_secs(10),
            search: Duration::from_secs(60),
            mute: Duration::from_secs(2),
            stereo: Duration::from_secs(2),
            rssi: Duration::from_secs(2),
        }
    }
}

impl TimeoutConfig {
    pub fn for_kind(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Enable => self.power_on,
            RequestKind::Disable => self.power_off,
            RequestKind::Tune => self.tune,
            RequestKind::Seek => self.seek,
            RequestKind::Search => self.search,
            RequestKind::SetMute => self.mute,
            RequestKind::SetStereo => self.stereo,
            RequestKind::GetRssi => self.rssi,
            // Kill never waits for the backend.
            RequestKind::Kill => Duration::ZERO,
        }
    }
}

/// Tuner controller configuration.
#[derive(Debug, Clone)]
pub struct TunerConfig {
    pub band: BandRegion,
    /// Frequency used when none was persisted (kHz).
    pub default_frequency: u32,
    pub timeouts: TimeoutConfig,
    /// Capacity of the request queue.
    pub request_queue: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            band: BandRegion::Europe,
            default_frequency: 87_500,
            timeouts: TimeoutConfig::default(),
            request_queue: 32,
        }
    }
}
