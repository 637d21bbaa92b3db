//! Settings singleton.

use chrono::Utc;
use rusqlite::params;

use super::super::Database;
use crate::error::ServerResult;
use crate::models::{Settings, format_timestamp, parse_timestamp};

impl Database {
    /// Reads the settings row.
    pub fn get_settings(&self) -> ServerResult<Settings> {
        let conn = self.conn();
        let settings = conn.query_row(
            "SELECT base_url, client_id, client_secret_enc, updated_at FROM settings WHERE id = 1",
            [],
            |row| {
                let updated_at: Option<String> = row.get(3)?;
                Ok(Settings {
                    base_url: row.get(0)?,
                    client_id: row.get(1)?,
                    client_secret_enc: row.get(2)?,
                    updated_at: updated_at.as_deref().and_then(parse_timestamp),
                })
            },
        )?;
        Ok(settings)
    }

    /// Overwrites the given columns; `None` leaves a column untouched.
    ///
    /// All writes happen in one transaction.
    pub fn update_settings_columns(
        &self,
        base_url: Option<&str>,
        client_id: Option<&str>,
        client_secret_enc: Option<&str>,
    ) -> ServerResult<()> {
        let mut conn = self.conn();
        let now = format_timestamp(Utc::now());
        let tx = conn.transaction()?;

        if let Some(base_url) = base_url {
            tx.execute(
                "UPDATE settings SET base_url = ?1, updated_at = ?2 WHERE id = 1",
                params![base_url, now],
            )?;
        }
        if let Some(client_id) = client_id {
            tx.execute(
                "UPDATE settings SET client_id = ?1, updated_at = ?2 WHERE id = 1",
                params![client_id, now],
            )?;
        }
        if let Some(secret) = client_secret_enc {
            tx.execute(
                "UPDATE settings SET client_secret_enc = ?1, updated_at = ?2 WHERE id = 1",
                params![secret, now],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
