//! Station list operations.

use rusqlite::params;

use super::{Database, FavoriteStation, Result, Station};

impl Database {
    /// List searched stations, ordered by frequency.
    pub fn list_stations(&self) -> Result<Vec<Station>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, frequency, title FROM stations ORDER BY frequency ASC")?;
        let stations = stmt
            .query_map([], |row| {
                Ok(Station {
                    id: row.get(0)?,
                    frequency: row.get(1)?,
                    title: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stations)
    }

    /// Replace the searched station list.
    ///
    /// Titles of frequencies that stay in the list are kept.
    pub fn replace_stations(&mut self, frequencies: &[u32]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let placeholders = vec!["?"; frequencies.len()].join(",");
            if frequencies.is_empty() {
                tx.execute("DELETE FROM stations", [])?;
            } else {
                tx.execute(
                    &format!("DELETE FROM stations WHERE frequency NOT IN ({})", placeholders),
                    rusqlite::params_from_iter(frequencies.iter()),
                )?;
            }

            let mut insert =
                tx.prepare("INSERT OR IGNORE INTO stations (frequency) VALUES (?1)")?;
            for frequency in frequencies {
                insert.execute(params![frequency])?;
            }
        }
        tx.commit()?;
        Ok(frequencies.len())
    }

    /// Set the title of a searched station.
    pub fn set_station_title(&self, frequency: u32, title: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE stations SET title = ?2 WHERE frequency = ?1",
            params![frequency, title],
        )?;
        Ok(updated > 0)
    }

    /// List favorite stations, ordered by position.
    pub fn list_favorite_stations(&self) -> Result<Vec<FavoriteStation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, frequency, title, position FROM favorite_stations ORDER BY position ASC, id ASC",
        )?;
        let favorites = stmt
            .query_map([], |row| {
                Ok(FavoriteStation {
                    id: row.get(0)?,
                    frequency: row.get(1)?,
                    title: row.get(2)?,
                    position: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(favorites)
    }

    /// Append a favorite at the end of the list.
    pub fn add_favorite_station(&self, frequency: u32, title: Option<&str>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO favorite_stations (frequency, title, position)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1 FROM favorite_stations))",
            params![frequency, title],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}
