//! Feed lifecycle: validation, secret tokens and soft deletion.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;
use tracing::info;

use crate::error::{ServerError, ServerResult};
use crate::models::{DEFAULT_FUTURE_DAYS, DEFAULT_PAST_DAYS, DEFAULT_REFRESH_HOURS, Feed};
use crate::store::{Database, NewFeedRow};

/// Length of a feed token in bytes before hex encoding.
pub const TOKEN_LEN: usize = 32;

/// Request to create a feed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFeed {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub calendar_ids: Vec<String>,
    pub include_past_days: Option<i64>,
    pub include_future_days: Option<i64>,
    pub refresh_interval_hours: Option<i64>,
}

/// Partial update of a feed. Only these two fields are mutable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedUpdate {
    pub calendar_ids: Option<Vec<String>>,
    pub refresh_interval_hours: Option<i64>,
}

impl FeedUpdate {
    pub fn is_empty(&self) -> bool {
        self.calendar_ids.is_none() && self.refresh_interval_hours.is_none()
    }
}

/// Builds the public URL of a feed.
pub fn feed_url(base_url: &str, token: &str) -> String {
    format!("{}/ical/{token}.ics", base_url.trim_end_matches('/'))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn bounded(field: &str, value: Option<i64>, min: i64, default: u32) -> ServerResult<u32> {
    let Some(value) = value else {
        return Ok(default);
    };
    if value < min {
        return Err(ServerError::validation(
            field,
            format!("must be at least {min}"),
        ));
    }
    u32::try_from(value).map_err(|_| ServerError::validation(field, "is too large"))
}

/// Trims, drops empties and collapses duplicates keeping first-seen order.
fn normalize_calendar_ids(ids: &[String]) -> ServerResult<Vec<String>> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(*id))
        .map(String::from)
        .collect();
    if ids.is_empty() {
        return Err(ServerError::validation(
            "calendarIds",
            "at least one calendar is required",
        ));
    }
    Ok(ids)
}

/// Owner of the feed rows.
#[derive(Debug, Clone)]
pub struct FeedRegistry {
    db: Arc<Database>,
}

impl FeedRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Validates `new` and stores it with a fresh token.
    pub fn create(&self, new: NewFeed) -> ServerResult<Feed> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(ServerError::validation("name", "must not be empty"));
        }
        let calendar_ids = normalize_calendar_ids(&new.calendar_ids)?;
        let include_past_days = bounded(
            "includePastDays",
            new.include_past_days,
            0,
            DEFAULT_PAST_DAYS,
        )?;
        let include_future_days = bounded(
            "includeFutureDays",
            new.include_future_days,
            1,
            DEFAULT_FUTURE_DAYS,
        )?;
        let refresh_interval_hours = bounded(
            "refreshIntervalHours",
            new.refresh_interval_hours,
            1,
            DEFAULT_REFRESH_HOURS,
        )?;

        let token = generate_token();
        let id = self.db.insert_feed(&NewFeedRow {
            name,
            token: &token,
            calendar_ids: &calendar_ids,
            include_past_days,
            include_future_days,
            refresh_interval_hours,
        })?;
        info!(feed_id = id, name, calendars = calendar_ids.len(), "feed created");
        self.get(id)
    }

    /// Applies a partial update to an enabled feed.
    pub fn update(&self, id: i64, update: FeedUpdate) -> ServerResult<Feed> {
        if update.is_empty() {
            return Err(ServerError::validation("body", "no fields to update"));
        }
        let calendar_ids = update
            .calendar_ids
            .as_deref()
            .map(normalize_calendar_ids)
            .transpose()?;
        let refresh_interval_hours = update
            .refresh_interval_hours
            .map(|hours| bounded("refreshIntervalHours", Some(hours), 1, DEFAULT_REFRESH_HOURS))
            .transpose()?;

        if !self
            .db
            .update_feed_columns(id, calendar_ids.as_deref(), refresh_interval_hours)?
        {
            return Err(ServerError::not_found("Feed"));
        }
        info!(feed_id = id, "feed updated");
        self.get(id)
    }

    /// Replaces the token; the old one stops resolving immediately.
    pub fn regenerate_token(&self, id: i64) -> ServerResult<Feed> {
        let token = generate_token();
        if !self.db.set_feed_token(id, &token)? {
            return Err(ServerError::not_found("Feed"));
        }
        info!(feed_id = id, "feed token regenerated");
        self.get(id)
    }

    /// Disables a feed. The row is kept.
    pub fn soft_delete(&self, id: i64) -> ServerResult<()> {
        if !self.db.disable_feed(id)? {
            return Err(ServerError::not_found("Feed"));
        }
        info!(feed_id = id, "feed disabled");
        Ok(())
    }

    /// Records a refresh now.
    pub fn touch_refreshed(&self, id: i64) -> ServerResult<()> {
        self.touch_refreshed_at(id, Utc::now())
    }

    /// Records a refresh at `at`. Repeating it is harmless.
    pub fn touch_refreshed_at(&self, id: i64, at: DateTime<Utc>) -> ServerResult<()> {
        if !self.db.set_feed_refreshed(id, at)? {
            return Err(ServerError::not_found("Feed"));
        }
        Ok(())
    }

    /// Resolves a published token. Unknown and disabled tokens look the same.
    pub fn find_by_token(&self, token: &str) -> ServerResult<Feed> {
        self.db
            .find_enabled_feed_by_token(token)?
            .ok_or_else(|| ServerError::not_found("Feed"))
    }

    /// Reads any feed, including disabled ones.
    pub fn get(&self, id: i64) -> ServerResult<Feed> {
        self.db
            .get_feed(id)?
            .ok_or_else(|| ServerError::not_found("Feed"))
    }

    /// Reads an enabled feed by id.
    pub fn get_enabled(&self, id: i64) -> ServerResult<Feed> {
        match self.db.get_feed(id)? {
            Some(feed) if feed.enabled => Ok(feed),
            _ => Err(ServerError::not_found("Feed")),
        }
    }

    pub fn list_enabled(&self) -> ServerResult<Vec<Feed>> {
        self.db.list_enabled_feeds()
    }
}
