//! In-process emulated tuner.
//!
//! Answers commands through the same event vocabulary as a hardware backend,
//! using a fixed station table. Used when no tuner is present.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use fmradio_protocol::{
    BackendCommand, BackendEvent, BandRegion, MuteState, SeekDirection,
};

use super::TunerBackend;
use crate::channel::ChannelError;

const EVENT_QUEUE_SIZE: usize = 64;

/// Noise floor reported away from any station.
const NOISE_RSSI: i32 = -110;

/// A station the emulator can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatedStation {
    pub frequency: u32,
    pub rssi: i32,
    pub program_service: Option<String>,
}

impl EmulatedStation {
    pub fn new(frequency: u32, rssi: i32, program_service: Option<&str>) -> Self {
        Self {
            frequency,
            rssi,
            program_service: program_service.map(str::to_string),
        }
    }
}

/// Default station table.
pub fn default_stations() -> Vec<EmulatedStation> {
    vec![
        EmulatedStation::new(88_100, -58, Some("CLASSIC")),
        EmulatedStation::new(91_300, -71, None),
        EmulatedStation::new(94_500, -49, Some("RADIO 1")),
        EmulatedStation::new(99_800, -64, Some("NEWS FM")),
        EmulatedStation::new(104_200, -77, Some("JAZZ")),
    ]
}

/// Emulated tuner backend.
pub struct EmulatedBackend {
    commands: Option<mpsc::UnboundedSender<BackendCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl EmulatedBackend {
    /// Start the emulator. `latency` delays every answer.
    pub fn start(
        band: BandRegion,
        stations: Vec<EmulatedStation>,
        latency: Duration,
    ) -> (Self, mpsc::Receiver<BackendEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        let mut stations: Vec<_> = stations
            .into_iter()
            .filter(|s| band.contains(s.frequency))
            .collect();
        stations.sort_by_key(|s| s.frequency);

        info!(
            "[Emulator] Starting with {} stations in band {}",
            stations.len(),
            band
        );

        let tuner = EmulatedTuner {
            band,
            stations,
            latency,
            powered: false,
            frequency: band.min_khz(),
        };
        let worker = tokio::spawn(tuner.run(command_rx, event_tx));

        (
            Self {
                commands: Some(command_tx),
                worker: Some(worker),
            },
            event_rx,
        )
    }

    fn send(&self, command: BackendCommand) -> Result<(), ChannelError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| ChannelError::BackendUnavailable("emulator closed".to_string()))?;
        commands
            .send(command)
            .map_err(|_| ChannelError::BackendUnavailable("emulator stopped".to_string()))
    }
}

#[async_trait]
impl TunerBackend for EmulatedBackend {
    fn name(&self) -> &str {
        "emulated"
    }

    async fn power_on(&mut self) -> Result<(), ChannelError> {
        self.send(BackendCommand::PowerOn)
    }

    async fn power_off(&mut self) -> Result<(), ChannelError> {
        self.send(BackendCommand::PowerOff)
    }

    async fn tune(&mut self, khz: u32) -> Result<(), ChannelError> {
        self.send(BackendCommand::Tune(khz))
    }

    async fn seek(&mut self, direction: SeekDirection) -> Result<(), ChannelError> {
        self.send(BackendCommand::Seek(direction))
    }

    async fn search(&mut self) -> Result<(), ChannelError> {
        self.send(BackendCommand::Search)
    }

    async fn set_mute(&mut self, state: MuteState) -> Result<(), ChannelError> {
        self.send(BackendCommand::SetMute(state))
    }

    async fn set_stereo(&mut self, enabled: bool) -> Result<(), ChannelError> {
        self.send(BackendCommand::SetStereo(enabled))
    }

    async fn get_rssi(&mut self) -> Result<(), ChannelError> {
        self.send(BackendCommand::GetRssi)
    }

    async fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(BackendCommand::Exit);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

struct EmulatedTuner {
    band: BandRegion,
    stations: Vec<EmulatedStation>,
    latency: Duration,
    powered: bool,
    frequency: u32,
}

impl EmulatedTuner {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<BackendCommand>,
        events: mpsc::Sender<BackendEvent>,
    ) {
        while let Some(command) = commands.recv().await {
            if command == BackendCommand::Exit {
                break;
            }
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            for event in self.answer(command) {
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
        debug!("[Emulator] Stopped");
    }

    fn answer(&mut self, command: BackendCommand) -> Vec<BackendEvent> {
        let kind = command.kind();
        match command {
            BackendCommand::PowerOn => {
                self.powered = true;
                return vec![BackendEvent::PowerAck(true)];
            }
            BackendCommand::PowerOff => {
                self.powered = false;
                return vec![BackendEvent::PowerAck(false)];
            }
            _ if !self.powered => {
                return vec![BackendEvent::Error {
                    kind: Some(kind),
                    reason: "tuner is off".to_string(),
                }];
            }
            _ => {}
        }

        match command {
            BackendCommand::Tune(khz) => {
                if !self.band.contains(khz) {
                    return vec![BackendEvent::Error {
                        kind: Some(kind),
                        reason: format!("{} kHz outside band", khz),
                    }];
                }
                self.frequency = khz;
                let mut events = vec![BackendEvent::FrequencySet(khz)];
                events.extend(self.program_service());
                events
            }
            BackendCommand::Seek(direction) => match self.next_station(direction) {
                Some(frequency) => {
                    self.frequency = frequency;
                    let mut events = vec![BackendEvent::SeekResult {
                        frequency,
                        found: true,
                    }];
                    events.extend(self.program_service());
                    events
                }
                None => vec![BackendEvent::SeekResult {
                    frequency: self.frequency,
                    found: false,
                }],
            },
            BackendCommand::Search => vec![BackendEvent::SearchResult(
                self.stations.iter().map(|s| s.frequency).collect(),
            )],
            BackendCommand::SetMute(state) => vec![BackendEvent::MuteAck(state)],
            BackendCommand::SetStereo(enabled) => vec![BackendEvent::StereoAck(enabled)],
            BackendCommand::GetRssi => vec![BackendEvent::RssiValue(
                self.current_station().map_or(NOISE_RSSI, |s| s.rssi),
            )],
            BackendCommand::PowerOn | BackendCommand::PowerOff | BackendCommand::Exit => {
                Vec::new()
            }
        }
    }

    fn current_station(&self) -> Option<&EmulatedStation> {
        self.stations.iter().find(|s| s.frequency == self.frequency)
    }

    fn program_service(&self) -> Option<BackendEvent> {
        self.current_station()
            .and_then(|s| s.program_service.clone())
            .map(BackendEvent::ProgramServiceText)
    }

    /// Next station in `direction`, wrapping around the band.
    fn next_station(&self, direction: SeekDirection) -> Option<u32> {
        let frequencies = self.stations.iter().map(|s| s.frequency);
        match direction {
            SeekDirection::Up => frequencies
                .clone()
                .find(|&f| f > self.frequency)
                .or_else(|| frequencies.clone().next()),
            SeekDirection::Down => frequencies
                .clone()
                .filter(|&f| f < self.frequency)
                .last()
                .or_else(|| frequencies.last()),
        }
    }
}
