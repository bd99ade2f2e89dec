//! Outward notifications of tuner state changes.

use log::{debug, info};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use fmradio_protocol::{MuteState, TunerState};

use crate::database::{FavoriteStation, Station};
use crate::status::format_mhz;

/// A confirmed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunerEvent {
    /// Settings are loaded and the tuner can be enabled.
    Ready {
        last_frequency: u32,
        autoplay: bool,
        rds_enabled: bool,
        stations: Vec<Station>,
        favorite_stations: Vec<FavoriteStation>,
    },
    StateChanged(TunerState),
    FrequencyChanged(u32),
    RssiUpdated(i32),
    ProgramServiceUpdated(Option<String>),
    MuteChanged(MuteState),
    StereoChanged(bool),
    SearchCompleted(Vec<u32>),
}

impl TunerEvent {
    /// Event kind used by outward transports.
    pub fn kind(&self) -> &'static str {
        match self {
            TunerEvent::Ready { .. } => "ready",
            TunerEvent::StateChanged(_) => "state_changed",
            TunerEvent::FrequencyChanged(_) => "frequency_set",
            TunerEvent::RssiUpdated(_) => "update_rssi",
            TunerEvent::ProgramServiceUpdated(_) => "update_ps",
            TunerEvent::MuteChanged(_) => "mute_changed",
            TunerEvent::StereoChanged(_) => "stereo_changed",
            TunerEvent::SearchCompleted(_) => "search_completed",
        }
    }

    /// JSON payload of the event.
    pub fn payload(&self) -> Value {
        match self {
            TunerEvent::Ready {
                last_frequency,
                autoplay,
                rds_enabled,
                stations,
                favorite_stations,
            } => json!({
                "last_frequency": last_frequency,
                "autoplay": autoplay,
                "rds_enabled": rds_enabled,
                "stations": stations,
                "favorite_stations": favorite_stations,
            }),
            TunerEvent::StateChanged(state) => json!({ "state": state }),
            TunerEvent::FrequencyChanged(khz) => json!({ "frequency": khz }),
            TunerEvent::RssiUpdated(level) => json!({ "rssi": level }),
            TunerEvent::ProgramServiceUpdated(text) => json!({ "program_service": text }),
            TunerEvent::MuteChanged(state) => json!({ "mute_state": state }),
            TunerEvent::StereoChanged(enabled) => json!({ "stereo": enabled }),
            TunerEvent::SearchCompleted(stations) => json!({ "stations": stations }),
        }
    }
}

/// Receiver of tuner notifications.
///
/// `publish` is called from the controller loop and must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: TunerEvent);
}

/// Fans events out to any number of subscribers.
///
/// Slow subscribers lose the oldest events.
pub struct BroadcastSink {
    sender: broadcast::Sender<TunerEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TunerEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: TunerEvent) {
        if self.sender.send(event).is_err() {
            debug!("[Sink] No subscribers");
        }
    }
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: TunerEvent) {
        match &event {
            TunerEvent::FrequencyChanged(khz) => {
                info!("[Tuner] Frequency: {} MHz", format_mhz(*khz).trim())
            }
            TunerEvent::ProgramServiceUpdated(Some(text)) => info!("[Tuner] RDS: {}", text),
            _ => info!("[Tuner] {}: {}", event.kind(), event.payload()),
        }
    }
}

/// Publishes every event to each inner sink in order.
pub struct FanoutSink(pub Vec<Box<dyn EventSink>>);

impl EventSink for FanoutSink {
    fn publish(&self, event: TunerEvent) {
        for sink in &self.0 {
            sink.publish(event.clone());
        }
    }
}
