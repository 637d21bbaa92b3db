//! Time windows for calendar queries.
//!
//! A feed publishes the events that fall inside a window spanning a number of
//! days before and after "now". [`TimeWindow`] represents that range.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A UTC range passed to calendar queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "TimeWindow start must be <= end");
        Self { start, end }
    }

    /// Creates the window `[now - past_days, now + future_days]`.
    ///
    /// Negative day counts are clamped to zero so the window never inverts.
    pub fn around(now: DateTime<Utc>, past_days: i64, future_days: i64) -> Self {
        Self {
            start: now - Duration::days(past_days.max(0)),
            end: now + Duration::days(future_days.max(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn around_spans_past_and_future_days() {
        let now = utc(2025, 3, 15, 12, 0, 0);
        let window = TimeWindow::around(now, 30, 365);

        assert_eq!(window.start, utc(2025, 2, 13, 12, 0, 0));
        assert_eq!(window.end, utc(2026, 3, 15, 12, 0, 0));
        assert_eq!(window.end - window.start, Duration::days(395));
    }

    #[test]
    fn around_clamps_negative_days() {
        let now = utc(2025, 3, 15, 12, 0, 0);
        let window = TimeWindow::around(now, -5, 1);

        assert_eq!(window.start, now);
        assert_eq!(window.end, now + Duration::days(1));
    }

    #[test]
    #[should_panic(expected = "TimeWindow start must be <= end")]
    fn new_rejects_inverted_window() {
        TimeWindow::new(utc(2025, 3, 15, 12, 0, 0), utc(2025, 3, 15, 11, 0, 0));
    }
}
