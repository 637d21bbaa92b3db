//! Session cache singleton.

use chrono::Utc;
use rusqlite::params;

use super::super::Database;
use crate::error::ServerResult;
use crate::models::format_timestamp;

impl Database {
    /// Returns the stored (encrypted) session cache blob.
    pub fn get_session_cache(&self) -> ServerResult<Option<String>> {
        let conn = self.conn();
        let blob: Option<String> = conn.query_row(
            "SELECT cache_data FROM session_cache WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(blob.filter(|b| !b.is_empty()))
    }

    /// Replaces the session cache blob. `None` clears it.
    pub fn put_session_cache(&self, blob: Option<&str>) -> ServerResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE session_cache SET cache_data = ?1, updated_at = ?2 WHERE id = 1",
            params![blob, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }
}
