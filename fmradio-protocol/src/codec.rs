//! Line codec for the backend wire protocol.

use crate::error::ProtocolError;
use crate::types::{BackendCommand, BackendEvent, MuteState, RequestKind};

/// Maximum length of a single backend line.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Encode a command as a single line, without the trailing newline.
pub fn encode_command(command: &BackendCommand) -> String {
    match command {
        BackendCommand::PowerOn => "enable".to_string(),
        BackendCommand::PowerOff => "disable".to_string(),
        BackendCommand::Tune(khz) => format!("setfreq {}", khz),
        BackendCommand::Seek(direction) => format!("seekhw {}", direction.wire_value()),
        BackendCommand::Search => "search".to_string(),
        BackendCommand::SetMute(state) => format!("setmute {}", state.wire_flag()),
        BackendCommand::SetStereo(enabled) => format!("setstereo {}", u8::from(*enabled)),
        BackendCommand::GetRssi => "rssi".to_string(),
        BackendCommand::Exit => "exit".to_string(),
    }
}

/// Decode a single response line into a typed event.
pub fn decode_response(line: &str) -> Result<BackendEvent, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    match head {
        "power" => Ok(BackendEvent::PowerAck(parse_flag("power", args.next())?)),
        "freq" => Ok(BackendEvent::FrequencySet(parse_number(
            "freq",
            "frequency",
            args.next(),
        )?)),
        "rssi" => Ok(BackendEvent::RssiValue(parse_number(
            "rssi",
            "level",
            args.next(),
        )?)),
        "ps" => Ok(BackendEvent::ProgramServiceText(rest.to_string())),
        "seek" => {
            let frequency = parse_number("seek", "frequency", args.next())?;
            let found = parse_flag("seek", args.next())?;
            Ok(BackendEvent::SeekResult { frequency, found })
        }
        "search" => {
            let mut stations = args
                .map(|value| {
                    value.parse::<u32>().map_err(|_| ProtocolError::InvalidArgument {
                        response: "search",
                        value: value.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            stations.sort_unstable();
            stations.dedup();
            Ok(BackendEvent::SearchResult(stations))
        }
        "mute" => {
            let state = if parse_flag("mute", args.next())? {
                MuteState::Muted
            } else {
                MuteState::Unmuted
            };
            Ok(BackendEvent::MuteAck(state))
        }
        "stereo" => Ok(BackendEvent::StereoAck(parse_flag("stereo", args.next())?)),
        "err" => {
            let (command, reason) = match rest.split_once(char::is_whitespace) {
                Some((command, reason)) => (command, reason.trim()),
                None => (rest, ""),
            };
            if command.is_empty() {
                return Err(ProtocolError::MissingArgument {
                    response: "err",
                    argument: "command",
                });
            }
            let reason = if reason.is_empty() {
                "unspecified".to_string()
            } else {
                reason.to_string()
            };
            Ok(BackendEvent::Error {
                kind: RequestKind::from_command_name(command),
                reason,
            })
        }
        other => Err(ProtocolError::UnknownResponse(other.to_string())),
    }
}

fn parse_flag(response: &'static str, value: Option<&str>) -> Result<bool, ProtocolError> {
    match value {
        Some("1") => Ok(true),
        Some("0") => Ok(false),
        Some(other) => Err(ProtocolError::InvalidArgument {
            response,
            value: other.to_string(),
        }),
        None => Err(ProtocolError::MissingArgument {
            response,
            argument: "flag",
        }),
    }
}

fn parse_number<T: std::str::FromStr>(
    response: &'static str,
    argument: &'static str,
    value: Option<&str>,
) -> Result<T, ProtocolError> {
    let value = value.ok_or(ProtocolError::MissingArgument { response, argument })?;
    value.parse::<T>().map_err(|_| ProtocolError::InvalidArgument {
        response,
        value: value.to_string(),
    })
}
