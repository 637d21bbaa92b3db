//! Provider-agnostic event data.
//!
//! [`RawEvent`] is what a [`CalendarSource`](crate::CalendarSource) hands back:
//! times already resolved to UTC (or a plain date for all-day events), text
//! fields flattened. Both the iCal renderer and the JSON events API consume it.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The time specification for an event boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum RawEventTime {
    /// A specific instant in UTC.
    DateTime(DateTime<Utc>),
    /// A calendar date, used for all-day events.
    Date(NaiveDate),
}

impl RawEventTime {
    /// Returns true if this is a date-only value.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// Formats as RFC 3339 for datetimes and `YYYY-MM-DD` for dates.
    pub fn to_api_string(&self) -> String {
        match self {
            Self::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            Self::Date(date) => date.format("%Y-%m-%d").to_string(),
        }
    }
}

/// A single event as read from a calendar source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Provider event id, reused as the iCal UID.
    pub id: String,
    /// Calendar the event was fetched from.
    pub calendar_id: String,
    /// Event subject.
    pub summary: Option<String>,
    /// Plain-text body preview.
    pub description: Option<String>,
    /// Location display name.
    pub location: Option<String>,
    pub start: RawEventTime,
    pub end: RawEventTime,
    /// Free/busy status as reported by the provider ("busy", "free", ...).
    pub show_as: Option<String>,
    /// Sensitivity as reported by the provider ("normal", "private", ...).
    pub sensitivity: Option<String>,
}

impl RawEvent {
    /// Creates an event with the required fields.
    pub fn new(
        id: impl Into<String>,
        calendar_id: impl Into<String>,
        start: RawEventTime,
        end: RawEventTime,
    ) -> Self {
        Self {
            id: id.into(),
            calendar_id: calendar_id.into(),
            summary: None,
            description: None,
            location: None,
            start,
            end,
            show_as: None,
            sensitivity: None,
        }
    }

    /// Returns true if both boundaries are dates.
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day() && self.end.is_all_day()
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 15, 9, 30, 0).unwrap()
    }

    #[test]
    fn date_time_variants() {
        let dt = RawEventTime::DateTime(instant());
        let date = RawEventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap());

        assert!(!dt.is_all_day());
        assert!(date.is_all_day());
    }

    #[test]
    fn api_string_format() {
        assert_eq!(
            RawEventTime::DateTime(instant()).to_api_string(),
            "2025-03-15T09:30:00Z"
        );
        assert_eq!(
            RawEventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()).to_api_string(),
            "2025-03-15"
        );
    }

    #[test]
    fn builder_sets_optional_fields() {
        let event = RawEvent::new(
            "evt-1",
            "cal1",
            RawEventTime::DateTime(instant()),
            RawEventTime::DateTime(instant() + chrono::Duration::hours(1)),
        )
        .with_summary("Standup")
        .with_location("Room 4")
        .with_description("daily sync");

        assert_eq!(event.summary.as_deref(), Some("Standup"));
        assert_eq!(event.location.as_deref(), Some("Room 4"));
        assert_eq!(event.description.as_deref(), Some("daily sync"));
        assert!(event.show_as.is_none());
        assert!(!event.is_all_day());
    }

    #[test]
    fn all_day_requires_both_dates() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        let event = RawEvent::new(
            "evt-2",
            "cal1",
            RawEventTime::Date(day),
            RawEventTime::Date(day.succ_opt().unwrap()),
        );
        assert!(event.is_all_day());
    }
}
