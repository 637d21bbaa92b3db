//! Persisted records.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of past days a feed publishes.
pub const DEFAULT_PAST_DAYS: u32 = 30;
/// Default number of future days a feed publishes.
pub const DEFAULT_FUTURE_DAYS: u32 = 365;
/// Default refresh interval.
pub const DEFAULT_REFRESH_HOURS: u32 = 6;

/// A published calendar feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: i64,
    pub name: String,
    /// Secret path component of the public URL.
    pub token: String,
    pub calendar_ids: Vec<String>,
    pub include_past_days: u32,
    pub include_future_days: u32,
    pub refresh_interval_hours: u32,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Provider credentials and public URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub base_url: Option<String>,
    pub client_id: Option<String>,
    /// Envelope produced by [`SecretCipher`](crate::SecretCipher).
    pub client_secret_enc: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Settings {
    /// Returns true when an encrypted secret is stored.
    pub fn has_client_secret(&self) -> bool {
        self.client_secret_enc.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Calendars shown in the interactive view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSelection {
    pub selected_calendar_ids: Vec<String>,
    pub last_view: String,
}

impl Default for UiSelection {
    fn default() -> Self {
        Self {
            selected_calendar_ids: Vec::new(),
            last_view: "month".to_string(),
        }
    }
}

/// Formats a timestamp for storage.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parses a stored timestamp.
///
/// Accepts RFC 3339 and SQLite's `CURRENT_TIMESTAMP` form
/// (`YYYY-MM-DD HH:MM:SS`, UTC), which older databases contain.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
