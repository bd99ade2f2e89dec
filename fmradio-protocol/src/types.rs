//! Core types shared by the tuner controller and its backends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunerState {
    /// Controller exists but `init` has not run yet.
    Uninitialized,
    /// Settings are loaded, hardware is off.
    PoweredOff,
    /// Power-on sent, waiting for the acknowledgment.
    PoweringOn,
    /// Hardware is on and accepts tuning commands.
    Ready,
    /// Power-off sent, waiting for the acknowledgment.
    PoweringOff,
    /// Terminal. No further commands are accepted.
    Dead,
}

impl TunerState {
    /// Returns true if tuning, seek, search and mute commands are valid.
    pub fn accepts_tuning(self) -> bool {
        self == TunerState::Ready
    }

    pub fn is_dead(self) -> bool {
        self == TunerState::Dead
    }

    pub fn name(self) -> &'static str {
        match self {
            TunerState::Uninitialized => "uninitialized",
            TunerState::PoweredOff => "powered_off",
            TunerState::PoweringOn => "powering_on",
            TunerState::Ready => "ready",
            TunerState::PoweringOff => "powering_off",
            TunerState::Dead => "dead",
        }
    }
}

impl fmt::Display for TunerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Audio mute state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteState {
    Muted,
    #[default]
    Unmuted,
}

impl MuteState {
    pub fn is_muted(self) -> bool {
        self == MuteState::Muted
    }

    /// Flag used on the wire (`1` = muted).
    pub fn wire_flag(self) -> u8 {
        match self {
            MuteState::Muted => 1,
            MuteState::Unmuted => 0,
        }
    }

    pub fn from_wire_flag(flag: u8) -> Option<Self> {
        match flag {
            1 => Some(MuteState::Muted),
            0 => Some(MuteState::Unmuted),
            _ => None,
        }
    }
}

impl FromStr for MuteState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "muted" | "mute" | "1" => Ok(MuteState::Muted),
            "unmuted" | "unmute" | "0" => Ok(MuteState::Unmuted),
            other => Err(format!("unknown mute state: {}", other)),
        }
    }
}

impl fmt::Display for MuteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuteState::Muted => f.write_str("muted"),
            MuteState::Unmuted => f.write_str("unmuted"),
        }
    }
}

/// Hardware seek direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekDirection {
    Up,
    Down,
}

impl SeekDirection {
    /// Non-negative values seek up, negative values seek down.
    pub fn from_sign(value: i32) -> Self {
        if value < 0 {
            SeekDirection::Down
        } else {
            SeekDirection::Up
        }
    }

    /// Value used on the wire (`1` or `-1`).
    pub fn wire_value(self) -> i32 {
        match self {
            SeekDirection::Up => 1,
            SeekDirection::Down => -1,
        }
    }
}

/// Category of a request awaiting a backend answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Tune,
    Seek,
    Search,
    SetMute,
    SetStereo,
    GetRssi,
    Enable,
    Disable,
    Kill,
}

impl RequestKind {
    /// Seek and search occupy the tuner exclusively.
    pub fn is_exclusive(self) -> bool {
        matches!(self, RequestKind::Seek | RequestKind::Search)
    }

    /// Name of the wire command issued for this kind.
    pub fn command_name(self) -> &'static str {
        match self {
            RequestKind::Tune => "setfreq",
            RequestKind::Seek => "seekhw",
            RequestKind::Search => "search",
            RequestKind::SetMute => "setmute",
            RequestKind::SetStereo => "setstereo",
            RequestKind::GetRssi => "rssi",
            RequestKind::Enable => "enable",
            RequestKind::Disable => "disable",
            RequestKind::Kill => "exit",
        }
    }

    /// Reverse of [`RequestKind::command_name`].
    pub fn from_command_name(name: &str) -> Option<Self> {
        match name {
            "setfreq" => Some(RequestKind::Tune),
            "seekhw" => Some(RequestKind::Seek),
            "search" => Some(RequestKind::Search),
            "setmute" => Some(RequestKind::SetMute),
            "setstereo" => Some(RequestKind::SetStereo),
            "rssi" => Some(RequestKind::GetRssi),
            "enable" => Some(RequestKind::Enable),
            "disable" => Some(RequestKind::Disable),
            "exit" => Some(RequestKind::Kill),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Tune => "tune",
            RequestKind::Seek => "seek",
            RequestKind::Search => "search",
            RequestKind::SetMute => "set_mute",
            RequestKind::SetStereo => "set_stereo",
            RequestKind::GetRssi => "get_rssi",
            RequestKind::Enable => "enable",
            RequestKind::Disable => "disable",
            RequestKind::Kill => "kill",
        };
        f.write_str(name)
    }
}

/// Command sent from the controller to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCommand {
    PowerOn,
    PowerOff,
    /// Tune to a frequency in kHz.
    Tune(u32),
    Seek(SeekDirection),
    Search,
    SetMute(MuteState),
    SetStereo(bool),
    GetRssi,
    /// Ask the backend process to terminate.
    Exit,
}

impl BackendCommand {
    pub fn kind(&self) -> RequestKind {
        match self {
            BackendCommand::PowerOn => RequestKind::Enable,
            BackendCommand::PowerOff => RequestKind::Disable,
            BackendCommand::Tune(_) => RequestKind::Tune,
            BackendCommand::Seek(_) => RequestKind::Seek,
            BackendCommand::Search => RequestKind::Search,
            BackendCommand::SetMute(_) => RequestKind::SetMute,
            BackendCommand::SetStereo(_) => RequestKind::SetStereo,
            BackendCommand::GetRssi => RequestKind::GetRssi,
            BackendCommand::Exit => RequestKind::Kill,
        }
    }
}

/// Typed event reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The tuner is now on this frequency (kHz).
    FrequencySet(u32),
    RssiValue(i32),
    /// RDS program-service name.
    ProgramServiceText(String),
    /// Hardware seek finished. `found` is false when no station was found.
    SeekResult { frequency: u32, found: bool },
    /// Full band scan result, ascending by frequency.
    SearchResult(Vec<u32>),
    MuteAck(MuteState),
    StereoAck(bool),
    PowerAck(bool),
    /// Command failure or unparseable output.
    Error {
        kind: Option<RequestKind>,
        reason: String,
    },
}
