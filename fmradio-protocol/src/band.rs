//! FM band plans.
//!
//! Each region defines the lowest and highest tunable frequency and the
//! channel raster. All values are in kHz.
//!
//! ```
//! use fmradio_protocol::band::BandRegion;
//! use fmradio_protocol::SeekDirection;
//!
//! let band = BandRegion::Europe;
//! assert!(band.contains(94_500));
//! assert_eq!(band.jump(108_000, SeekDirection::Up), 87_500);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::SeekDirection;

/// Regional FM band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandRegion {
    /// ITU region 1 and most of the world.
    #[default]
    Europe,
    /// North and South America, 200 kHz raster.
    Americas,
    Japan,
    /// Legacy Eastern European band.
    Oirt,
    /// 76-108 MHz, used by chips that cover the extended band.
    Wide,
}

impl BandRegion {
    pub fn min_khz(self) -> u32 {
        match self {
            BandRegion::Europe => 87_500,
            BandRegion::Americas => 87_900,
            BandRegion::Japan => 76_000,
            BandRegion::Oirt => 65_900,
            BandRegion::Wide => 76_000,
        }
    }

    pub fn max_khz(self) -> u32 {
        match self {
            BandRegion::Europe => 108_000,
            BandRegion::Americas => 107_900,
            BandRegion::Japan => 95_000,
            BandRegion::Oirt => 74_000,
            BandRegion::Wide => 108_000,
        }
    }

    pub fn step_khz(self) -> u32 {
        match self {
            BandRegion::Europe | BandRegion::Japan => 100,
            BandRegion::Americas => 200,
            BandRegion::Oirt => 30,
            BandRegion::Wide => 50,
        }
    }

    pub fn contains(self, khz: u32) -> bool {
        (self.min_khz()..=self.max_khz()).contains(&khz)
    }

    pub fn clamp(self, khz: u32) -> u32 {
        khz.clamp(self.min_khz(), self.max_khz())
    }

    /// Move one channel step, wrapping around at the band edges.
    pub fn jump(self, from: u32, direction: SeekDirection) -> u32 {
        let from = self.clamp(from);
        match direction {
            SeekDirection::Up => {
                let next = from + self.step_khz();
                if next > self.max_khz() {
                    self.min_khz()
                } else {
                    next
                }
            }
            SeekDirection::Down => {
                if from < self.min_khz() + self.step_khz() {
                    self.max_khz()
                } else {
                    from - self.step_khz()
                }
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BandRegion::Europe => "europe",
            BandRegion::Americas => "americas",
            BandRegion::Japan => "japan",
            BandRegion::Oirt => "oirt",
            BandRegion::Wide => "wide",
        }
    }
}

impl fmt::Display for BandRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BandRegion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "europe" | "eu" => Ok(BandRegion::Europe),
            "americas" | "us" => Ok(BandRegion::Americas),
            "japan" | "jp" => Ok(BandRegion::Japan),
            "oirt" => Ok(BandRegion::Oirt),
            "wide" => Ok(BandRegion::Wide),
            other => Err(format!("unknown band region: {}", other)),
        }
    }
}
