//! Database models.

use serde::Serialize;

/// Settings key of the last confirmed frequency (kHz).
pub const KEY_LAST_FREQUENCY: &str = "last_frequency";
/// Settings key of the autoplay flag.
pub const KEY_AUTOPLAY: &str = "autoplay";
/// Settings key of the RDS enable flag.
pub const KEY_RDS_ENABLE: &str = "rds_enable";

/// A station found by a band search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Station {
    pub id: i64,
    /// Frequency in kHz.
    pub frequency: u32,
    pub title: Option<String>,
}

/// A station pinned by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FavoriteStation {
    pub id: i64,
    pub frequency: u32,
    pub title: Option<String>,
    pub position: i64,
}
