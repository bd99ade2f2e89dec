//! In-memory snapshot of the tuner configuration.
//!
//! The controller is the only writer. Readers get whole snapshots through a
//! watch channel, so a frequency change and the cleared program service name
//! are always observed together.

use serde::Serialize;
use tokio::sync::watch;

use fmradio_protocol::MuteState;

/// Current tuner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Configuration {
    /// Frequency in kHz.
    pub frequency: u32,
    /// RDS program service name of the current station.
    pub program_service: Option<String>,
    pub mute_state: MuteState,
    pub stereo: bool,
    /// Last reported signal strength.
    pub rssi: Option<i32>,
}

impl Configuration {
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency,
            program_service: None,
            mute_state: MuteState::Unmuted,
            stereo: true,
            rssi: None,
        }
    }
}

/// Writer side of the configuration.
pub struct ConfigurationStore {
    sender: watch::Sender<Configuration>,
}

impl ConfigurationStore {
    pub fn new(initial: Configuration) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Current snapshot.
    pub fn get(&self) -> Configuration {
        self.sender.borrow().clone()
    }

    pub fn frequency(&self) -> u32 {
        self.sender.borrow().frequency
    }

    /// Replace the whole configuration.
    pub fn set(&self, configuration: Configuration) {
        self.sender.send_replace(configuration);
    }

    /// Apply a multi-field change as one update.
    ///
    /// Returns false, without notifying readers, when nothing changed.
    pub fn update<F>(&self, modify: F) -> bool
    where
        F: FnOnce(&mut Configuration),
    {
        self.sender.send_if_modified(|config| {
            let before = config.clone();
            modify(config);
            *config != before
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Configuration> {
        self.sender.subscribe()
    }
}
