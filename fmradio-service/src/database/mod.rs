//! Database module for tuner settings and station lists.
//!
//! This module provides SQLite-based persistent storage for:
//! - Key-value settings (last frequency, autoplay, RDS enable)
//! - Stations found by a full band search
//! - Favorite stations
//!
//! The controller only sees the [`KeyValueStore`] and [`StationList`] traits.

mod models;
mod schema;
mod settings;
mod stations;

pub use models::*;

use std::path::Path;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;
use rusqlite::Connection;
use thiserror::Error;

/// Database error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Main database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }
}

/// Key-value settings read by the controller.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Read an integer setting. Missing or unreadable values yield `default`.
    fn get_u32(&self, key: &str, default: u32) -> u32 {
        match self.get(key) {
            Ok(Some(value)) => value.trim().parse().unwrap_or_else(|_| {
                warn!("[Settings] Ignoring invalid value for {}: {:?}", key, value);
                default
            }),
            Ok(None) => default,
            Err(e) => {
                warn!("[Settings] Failed to read {}: {}", key, e);
                default
            }
        }
    }

    /// Read a boolean setting. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Ok(Some(value)) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    warn!("[Settings] Ignoring invalid value for {}: {:?}", key, value);
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                warn!("[Settings] Failed to read {}: {}", key, e);
                default
            }
        }
    }

    fn put_u32(&self, key: &str, value: u32) -> Result<()> {
        self.put(key, &value.to_string())
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, if value { "1" } else { "0" })
    }
}

/// Read-only station lists queried at startup.
pub trait StationList: Send + Sync {
    fn stations(&self) -> Result<Vec<Station>>;

    fn favorite_stations(&self) -> Result<Vec<FavoriteStation>>;
}

/// Database shared between the controller and the service.
#[derive(Clone)]
pub struct SharedDatabase(Arc<Mutex<Database>>);

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self(Arc::new(Mutex::new(db)))
    }

    /// Replace the searched station list.
    pub fn replace_stations(&self, frequencies: &[u32]) -> Result<usize> {
        self.0.lock().replace_stations(frequencies)
    }

    pub fn add_favorite_station(&self, frequency: u32, title: Option<&str>) -> Result<i64> {
        self.0.lock().add_favorite_station(frequency, title)
    }
}

impl KeyValueStore for SharedDatabase {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.0.lock().get_setting(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.0.lock().put_setting(key, value)
    }
}

impl StationList for SharedDatabase {
    fn stations(&self) -> Result<Vec<Station>> {
        self.0.lock().list_stations()
    }

    fn favorite_stations(&self) -> Result<Vec<FavoriteStation>> {
        self.0.lock().list_favorite_stations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedDatabase {
        SharedDatabase::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_typed_settings_defaults() {
        let db = shared();
        assert_eq!(db.get_u32(KEY_LAST_FREQUENCY, 87_500), 87_500);
        assert!(!db.get_bool(KEY_AUTOPLAY, false));
        assert!(db.get_bool(KEY_RDS_ENABLE, true));
    }

    #[test]
    fn test_typed_settings_round_trip() {
        let db = shared();
        db.put_u32(KEY_LAST_FREQUENCY, 94_500).unwrap();
        db.put_bool(KEY_RDS_ENABLE, false).unwrap();
        db.put(KEY_AUTOPLAY, "yes").unwrap();

        assert_eq!(db.get_u32(KEY_LAST_FREQUENCY, 87_500), 94_500);
        assert!(!db.get_bool(KEY_RDS_ENABLE, true));
        assert!(db.get_bool(KEY_AUTOPLAY, false));
    }

    #[test]
    fn test_invalid_value_falls_back_to_default() {
        let db = shared();
        db.put(KEY_LAST_FREQUENCY, "ninety").unwrap();
        db.put(KEY_AUTOPLAY, "maybe").unwrap();
        assert_eq!(db.get_u32(KEY_LAST_FREQUENCY, 87_500), 87_500);
        assert!(!db.get_bool(KEY_AUTOPLAY, false));
    }

    #[test]
    fn test_persisted_across_reopen() {
        let dir = std::env::temp_dir().join(format!("fmradio-db-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tuner.db");
        let _ = std::fs::remove_file(&path);

        {
            let db = SharedDatabase::new(Database::open(&path).unwrap());
            db.put_u32(KEY_LAST_FREQUENCY, 101_100).unwrap();
        }
        let db = SharedDatabase::new(Database::open(&path).unwrap());
        assert_eq!(db.get_u32(KEY_LAST_FREQUENCY, 87_500), 101_100);

        drop(db);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
