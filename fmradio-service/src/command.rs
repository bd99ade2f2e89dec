//! Text commands accepted by the service.
//!
//! One command per line, e.g. `freq 94500`, `seek 1`, `mute muted`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use fmradio_protocol::{MuteState, SeekDirection};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("{command}: invalid argument {value:?}")]
    InvalidArgument {
        command: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    Init,
    Enable,
    Disable,
    SetFrequency(u32),
    /// Query signal strength.
    Status,
    Seek(SeekDirection),
    Jump(SeekDirection),
    Stereo(bool),
    Mute(MuteState),
    Search,
    Kill,
    Help,
}

impl ServiceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceCommand::Init => "init",
            ServiceCommand::Enable => "enable",
            ServiceCommand::Disable => "disable",
            ServiceCommand::SetFrequency(_) => "freq",
            ServiceCommand::Status => "status",
            ServiceCommand::Seek(_) => "seek",
            ServiceCommand::Jump(_) => "jump",
            ServiceCommand::Stereo(_) => "stereo",
            ServiceCommand::Mute(_) => "mute",
            ServiceCommand::Search => "search",
            ServiceCommand::Kill => "kill",
            ServiceCommand::Help => "help",
        }
    }
}

pub const USAGE: &str = "\
commands:
  init                 load settings
  enable | disable     power the tuner on or off
  freq <khz>           tune, e.g. freq 94500
  jump [1|-1]          step one channel (default down)
  seek [1|-1]          hardware seek (default down)
  search               scan the band
  stereo [on|off]      stereo or forced mono
  mute <muted|unmuted> mute audio
  status               read signal strength
  kill                 stop the service";

/// Direction argument: `1`/`-1` or `up`/`down`. Missing means down.
fn parse_direction(command: &'static str, arg: Option<&str>) -> Result<SeekDirection, CommandError> {
    let Some(arg) = arg else {
        return Ok(SeekDirection::Down);
    };
    match arg.to_ascii_lowercase().as_str() {
        "up" => Ok(SeekDirection::Up),
        "down" => Ok(SeekDirection::Down),
        other => other
            .parse::<i32>()
            .map(SeekDirection::from_sign)
            .map_err(|_| CommandError::InvalidArgument {
                command,
                value: arg.to_string(),
            }),
    }
}

impl FromStr for ServiceCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().ok_or(CommandError::Empty)?;
        let arg = parts.next();

        let command = match name.to_ascii_lowercase().as_str() {
            "init" => ServiceCommand::Init,
            "enable" | "on" => ServiceCommand::Enable,
            "disable" | "off" => ServiceCommand::Disable,
            "freq" | "tune" => {
                let value = arg.ok_or(CommandError::MissingArgument {
                    command: "freq",
                    argument: "frequency",
                })?;
                let khz = value.parse().map_err(|_| CommandError::InvalidArgument {
                    command: "freq",
                    value: value.to_string(),
                })?;
                ServiceCommand::SetFrequency(khz)
            }
            "status" | "rssi" => ServiceCommand::Status,
            "seek" => ServiceCommand::Seek(parse_direction("seek", arg)?),
            "jump" => ServiceCommand::Jump(parse_direction("jump", arg)?),
            "stereo" => match arg.map(str::to_ascii_lowercase).as_deref() {
                None | Some("on") | Some("1") => ServiceCommand::Stereo(true),
                Some("off") | Some("mono") | Some("0") => ServiceCommand::Stereo(false),
                Some(other) => {
                    return Err(CommandError::InvalidArgument {
                        command: "stereo",
                        value: other.to_string(),
                    })
                }
            },
            "mute" => {
                let value = arg.ok_or(CommandError::MissingArgument {
                    command: "mute",
                    argument: "state",
                })?;
                let state = value.parse().map_err(|_| CommandError::InvalidArgument {
                    command: "mute",
                    value: value.to_string(),
                })?;
                ServiceCommand::Mute(state)
            }
            "search" | "scan" => ServiceCommand::Search,
            "kill" | "quit" | "exit" => ServiceCommand::Kill,
            "help" | "?" => ServiceCommand::Help,
            _ => return Err(CommandError::Unknown(name.to_string())),
        };

        Ok(command)
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCommand::SetFrequency(khz) => write!(f, "freq {}", khz),
            ServiceCommand::Seek(direction) | ServiceCommand::Jump(direction) => {
                write!(f, "{} {}", self.name(), direction.wire_value())
            }
            ServiceCommand::Stereo(enabled) => {
                write!(f, "stereo {}", if *enabled { "on" } else { "off" })
            }
            ServiceCommand::Mute(state) => write!(f, "mute {}", state),
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("init".parse(), Ok(ServiceCommand::Init));
        assert_eq!("  ENABLE ".parse(), Ok(ServiceCommand::Enable));
        assert_eq!("search".parse(), Ok(ServiceCommand::Search));
        assert_eq!("status".parse(), Ok(ServiceCommand::Status));
        assert_eq!("kill".parse(), Ok(ServiceCommand::Kill));
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!("freq 94500".parse(), Ok(ServiceCommand::SetFrequency(94_500)));
        assert_eq!(
            "freq".parse::<ServiceCommand>(),
            Err(CommandError::MissingArgument {
                command: "freq",
                argument: "frequency"
            })
        );
        assert!(matches!(
            "freq 94.5".parse::<ServiceCommand>(),
            Err(CommandError::InvalidArgument { command: "freq", .. })
        ));
    }

    #[test]
    fn test_direction_defaults_to_down() {
        assert_eq!("seek".parse(), Ok(ServiceCommand::Seek(SeekDirection::Down)));
        assert_eq!("jump".parse(), Ok(ServiceCommand::Jump(SeekDirection::Down)));
        assert_eq!("seek 1".parse(), Ok(ServiceCommand::Seek(SeekDirection::Up)));
        assert_eq!("jump -1".parse(), Ok(ServiceCommand::Jump(SeekDirection::Down)));
        assert_eq!("jump up".parse(), Ok(ServiceCommand::Jump(SeekDirection::Up)));
        assert!("seek sideways".parse::<ServiceCommand>().is_err());
    }

    #[test]
    fn test_parse_stereo_and_mute() {
        assert_eq!("stereo".parse(), Ok(ServiceCommand::Stereo(true)));
        assert_eq!("stereo off".parse(), Ok(ServiceCommand::Stereo(false)));
        assert_eq!("mute muted".parse(), Ok(ServiceCommand::Mute(MuteState::Muted)));
        assert_eq!("mute 0".parse(), Ok(ServiceCommand::Mute(MuteState::Unmuted)));
        assert!(matches!(
            "mute".parse::<ServiceCommand>(),
            Err(CommandError::MissingArgument { command: "mute", .. })
        ));
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!("".parse::<ServiceCommand>(), Err(CommandError::Empty));
        assert_eq!(
            "reboot".parse::<ServiceCommand>(),
            Err(CommandError::Unknown("reboot".to_string()))
        );
    }

    #[test]
    fn test_display_parses_back() {
        for command in [
            ServiceCommand::SetFrequency(101_100),
            ServiceCommand::Seek(SeekDirection::Up),
            ServiceCommand::Stereo(false),
            ServiceCommand::Mute(MuteState::Muted),
        ] {
            assert_eq!(command.to_string().parse(), Ok(command));
        }
    }
}
