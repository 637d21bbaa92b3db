//! Interactive view state.

use chrono::Utc;
use rusqlite::params;

use super::super::Database;
use crate::error::ServerResult;
use crate::models::{UiSelection, format_timestamp};

impl Database {
    pub fn get_ui_selection(&self) -> ServerResult<UiSelection> {
        let conn = self.conn();
        let (ids_json, last_view): (Option<String>, Option<String>) = conn.query_row(
            "SELECT selected_calendar_ids_json, last_view FROM ui_state WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let defaults = UiSelection::default();
        Ok(UiSelection {
            selected_calendar_ids: ids_json
                .and_then(|json| serde_json::from_str(&json).ok())
                .unwrap_or(defaults.selected_calendar_ids),
            last_view: last_view
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.last_view),
        })
    }

    /// Stores the selected calendar ids, and the view name when given.
    pub fn set_ui_selection(
        &self,
        calendar_ids: &[String],
        last_view: Option<&str>,
    ) -> ServerResult<()> {
        let ids_json = serde_json::to_string(calendar_ids).unwrap_or_else(|_| "[]".to_string());
        let conn = self.conn();
        conn.execute(
            "UPDATE ui_state
             SET selected_calendar_ids_json = ?1,
                 last_view = COALESCE(?2, last_view),
                 updated_at = ?3
             WHERE id = 1",
            params![ids_json, last_view, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }
}
