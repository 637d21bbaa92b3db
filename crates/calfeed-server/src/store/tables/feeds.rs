//! Feed rows.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::super::Database;
use crate::error::ServerResult;
use crate::models::{
    DEFAULT_FUTURE_DAYS, DEFAULT_PAST_DAYS, DEFAULT_REFRESH_HOURS, Feed, format_timestamp,
    parse_timestamp,
};

const FEED_COLUMNS: &str = "id, name, token, calendar_ids_json, include_past_days, \
     include_future_days, refresh_interval_hours, last_refreshed_at, enabled, created_at, updated_at";

/// Values for a new feed row, already validated.
#[derive(Debug, Clone)]
pub struct NewFeedRow<'a> {
    pub name: &'a str,
    pub token: &'a str,
    pub calendar_ids: &'a [String],
    pub include_past_days: u32,
    pub include_future_days: u32,
    pub refresh_interval_hours: u32,
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    let calendar_ids_json: String = row.get(3)?;
    let last_refreshed_at: Option<String> = row.get(7)?;
    let enabled: Option<i64> = row.get(8)?;
    let created_at: Option<String> = row.get(9)?;
    let updated_at: Option<String> = row.get(10)?;

    Ok(Feed {
        id: row.get(0)?,
        name: row.get(1)?,
        token: row.get(2)?,
        calendar_ids: serde_json::from_str(&calendar_ids_json).unwrap_or_default(),
        include_past_days: row
            .get::<_, Option<u32>>(4)?
            .unwrap_or(DEFAULT_PAST_DAYS),
        include_future_days: row
            .get::<_, Option<u32>>(5)?
            .unwrap_or(DEFAULT_FUTURE_DAYS),
        refresh_interval_hours: row
            .get::<_, Option<u32>>(6)?
            .unwrap_or(DEFAULT_REFRESH_HOURS),
        last_refreshed_at: last_refreshed_at.as_deref().and_then(parse_timestamp),
        enabled: enabled.unwrap_or(1) != 0,
        created_at: created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_default(),
        updated_at: updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_default(),
    })
}

impl Database {
    /// Inserts a feed and returns its id.
    pub fn insert_feed(&self, feed: &NewFeedRow<'_>) -> ServerResult<i64> {
        let calendar_ids_json =
            serde_json::to_string(feed.calendar_ids).unwrap_or_else(|_| "[]".to_string());
        let now = format_timestamp(Utc::now());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO feeds (name, token, calendar_ids_json, include_past_days,
                include_future_days, refresh_interval_hours, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
            params![
                feed.name,
                feed.token,
                calendar_ids_json,
                feed.include_past_days,
                feed.include_future_days,
                feed.refresh_interval_hours,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Reads a feed by id, enabled or not.
    pub fn get_feed(&self, id: i64) -> ServerResult<Option<Feed>> {
        let conn = self.conn();
        let feed = conn
            .query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                [id],
                feed_from_row,
            )
            .optional()?;
        Ok(feed)
    }

    /// Reads an enabled feed by its token.
    pub fn find_enabled_feed_by_token(&self, token: &str) -> ServerResult<Option<Feed>> {
        let conn = self.conn();
        let feed = conn
            .query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE token = ?1 AND enabled = 1"),
                [token],
                feed_from_row,
            )
            .optional()?;
        Ok(feed)
    }

    /// Lists enabled feeds, newest first.
    pub fn list_enabled_feeds(&self) -> ServerResult<Vec<Feed>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE enabled = 1 ORDER BY created_at DESC, id DESC"
        ))?;
        let feeds = stmt
            .query_map([], feed_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(feeds)
    }

    /// Updates the mutable columns of an enabled feed. Returns false if no
    /// enabled feed has this id.
    pub fn update_feed_columns(
        &self,
        id: i64,
        calendar_ids: Option<&[String]>,
        refresh_interval_hours: Option<u32>,
    ) -> ServerResult<bool> {
        let calendar_ids_json = calendar_ids
            .map(|ids| serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string()));
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE feeds
             SET calendar_ids_json = COALESCE(?1, calendar_ids_json),
                 refresh_interval_hours = COALESCE(?2, refresh_interval_hours),
                 updated_at = ?3
             WHERE id = ?4 AND enabled = 1",
            params![
                calendar_ids_json,
                refresh_interval_hours,
                format_timestamp(Utc::now()),
                id
            ],
        )?;
        Ok(changed > 0)
    }

    /// Replaces the token of an enabled feed in a single statement.
    pub fn set_feed_token(&self, id: i64, token: &str) -> ServerResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE feeds SET token = ?1, updated_at = ?2 WHERE id = ?3 AND enabled = 1",
            params![token, format_timestamp(Utc::now()), id],
        )?;
        Ok(changed > 0)
    }

    /// Clears the enabled flag.
    pub fn disable_feed(&self, id: i64) -> ServerResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE feeds SET enabled = 0, updated_at = ?1 WHERE id = ?2 AND enabled = 1",
            params![format_timestamp(Utc::now()), id],
        )?;
        Ok(changed > 0)
    }

    /// Records a refresh at `at`. Does not bump `updated_at`.
    pub fn set_feed_refreshed(&self, id: i64, at: DateTime<Utc>) -> ServerResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE feeds SET last_refreshed_at = ?1 WHERE id = ?2",
            params![format_timestamp(at), id],
        )?;
        Ok(changed > 0)
    }
}
