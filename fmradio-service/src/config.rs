//! Configuration file format.
//!
//! Every section and key is optional. Command line arguments take precedence
//! over the file, which takes precedence over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use fmradio_protocol::BandRegion;

use crate::tuner::{TimeoutConfig, TunerConfig};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "fmradio-service.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Default frequency {frequency} kHz is outside the {band} band")]
    FrequencyOutOfBand { frequency: u32, band: BandRegion },
}

/// Which backend drives the tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Native helper program for Qualcomm chipsets.
    #[default]
    Qualcomm,
    /// In-process simulated tuner.
    Emulated,
}

#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub tuner: TunerSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct TunerSection {
    pub band: Option<BandRegion>,
    pub default_frequency: Option<u32>,
    pub request_queue: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BackendSection {
    pub kind: Option<BackendKind>,
    /// Helper program. Overrides the per-architecture lookup in `dir`.
    pub program: Option<String>,
    /// Directory holding `fmbin-<arch>` helpers.
    pub dir: Option<String>,
    pub args: Option<Vec<String>>,
    pub write_timeout_ms: Option<u64>,
    /// Simulated command latency of the emulated backend.
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TimeoutSection {
    pub power_on_ms: Option<u64>,
    pub power_off_ms: Option<u64>,
    pub tune_ms: Option<u64>,
    pub seek_ms: Option<u64>,
    pub search_ms: Option<u64>,
    pub mute_ms: Option<u64>,
    pub stereo_ms: Option<u64>,
    pub rssi_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DatabaseSection {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Build the controller configuration. `band` overrides the file.
    pub fn tuner_config(&self, band: Option<BandRegion>) -> Result<TunerConfig, ConfigError> {
        let defaults = TunerConfig::default();
        let band = band.or(self.tuner.band).unwrap_or(defaults.band);

        let default_frequency = match self.tuner.default_frequency {
            Some(frequency) if !band.contains(frequency) => {
                return Err(ConfigError::FrequencyOutOfBand { frequency, band })
            }
            Some(frequency) => frequency,
            None => band.clamp(defaults.default_frequency),
        };

        Ok(TunerConfig {
            band,
            default_frequency,
            timeouts: self.timeouts.apply(defaults.timeouts),
            request_queue: self.tuner.request_queue.unwrap_or(defaults.request_queue),
        })
    }
}

impl TimeoutSection {
    fn apply(&self, defaults: TimeoutConfig) -> TimeoutConfig {
        let pick = |ms: Option<u64>, default: Duration| ms.map(Duration::from_millis).unwrap_or(default);
        TimeoutConfig {
            power_on: pick(self.power_on_ms, defaults.power_on),
            power_off: pick(self.power_off_ms, defaults.power_off),
            tune: pick(self.tune_ms, defaults.tune),
            seek: pick(self.seek_ms, defaults.seek),
            search: pick(self.search_ms, defaults.search),
            mute: pick(self.mute_ms, defaults.mute),
            stereo: pick(self.stereo_ms, defaults.stereo),
            rssi: pick(self.rssi_ms, defaults.rssi),
        }
    }
}
