//! Database schema definitions.

/// SQL schema for the tuner database.
pub const SCHEMA_SQL: &str = r#"
-- Key-value settings (last frequency, feature flags)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Stations found by the last full band search
CREATE TABLE IF NOT EXISTS stations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    frequency INTEGER UNIQUE NOT NULL,   -- kHz
    title TEXT,                          -- Last seen program service name
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- User favorites, ordered by position
CREATE TABLE IF NOT EXISTS favorite_stations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    frequency INTEGER NOT NULL,          -- kHz
    title TEXT,
    position INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_favorite_stations_position ON favorite_stations(position);
"#;
