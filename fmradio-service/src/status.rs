//! Status text for the current tuner configuration.

use std::fmt;

use crate::tuner::Configuration;

/// Text shown when no RDS program service name is known.
pub const NO_RDS_TEXT: &str = "< no rds >";

/// Format kHz as MHz with one decimal, right-aligned to five columns.
pub fn format_mhz(khz: u32) -> String {
    format!("{:5.1}", f64::from(khz) / 1000.0)
}

/// Two-line status summary of a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Program service name, or a placeholder.
    pub text: String,
    /// Frequency, e.g. `94.5 MHz`.
    pub subtext: String,
}

impl From<&Configuration> for StatusLine {
    fn from(config: &Configuration) -> Self {
        let text = config
            .program_service
            .as_deref()
            .filter(|ps| !ps.trim().is_empty())
            .unwrap_or(NO_RDS_TEXT)
            .to_string();
        let subtext = format!("{} MHz", format_mhz(config.frequency).trim());
        Self { text, subtext }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.text, self.subtext)
    }
}
