//! iCalendar rendering of a feed.

use calfeed_core::TimeWindow;
use calfeed_providers::{
    CalendarSource, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, FetchOptions, RawEvent, RawEventTime,
};
use chrono::{DateTime, Utc};
use icalendar::{Calendar, Component, DatePerhapsTime, Event, EventLike};
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};
use crate::models::Feed;

/// A rendered `.ics` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFeed {
    pub body: String,
    /// `<feed name>.ics`
    pub filename: String,
}

/// Events gathered from several calendars.
#[derive(Debug, Default)]
pub struct Collected {
    pub events: Vec<RawEvent>,
    /// Calendars whose fetch failed.
    pub failed: Vec<String>,
}

impl Collected {
    /// True when calendars were requested and none of them answered.
    pub fn all_failed(&self, requested: usize) -> bool {
        requested > 0 && self.failed.len() == requested
    }
}

/// Fetches every calendar in turn. A failing calendar is logged and skipped.
pub async fn collect_events(
    source: &dyn CalendarSource,
    calendar_ids: &[String],
    options: FetchOptions,
) -> Collected {
    let mut collected = Collected::default();
    for calendar_id in calendar_ids {
        match source.list_events(calendar_id, options).await {
            Ok(events) => {
                debug!(calendar_id = %calendar_id, count = events.len(), "fetched events");
                collected.events.extend(events);
            }
            Err(e) => {
                warn!(calendar_id = %calendar_id, error = %e, "skipping calendar");
                collected.failed.push(calendar_id.clone());
            }
        }
    }
    collected
}

fn ical_time(time: RawEventTime) -> DatePerhapsTime {
    match time {
        RawEventTime::DateTime(dt) => dt.into(),
        RawEventTime::Date(date) => date.into(),
    }
}

fn to_ical_event(event: &RawEvent) -> Event {
    let mut ev = Event::new();
    ev.uid(&event.id)
        .starts(ical_time(event.start))
        .ends(ical_time(event.end));
    if let Some(summary) = event.summary.as_deref() {
        ev.summary(summary);
    }
    if let Some(description) = event.description.as_deref().filter(|d| !d.is_empty()) {
        ev.description(description);
    }
    if let Some(location) = event.location.as_deref().filter(|l| !l.is_empty()) {
        ev.location(location);
    }
    ev.done()
}

/// Renders feeds into iCalendar documents.
#[derive(Debug, Clone, Copy)]
pub struct FeedPublisher {
    page_size: usize,
    max_pages: usize,
}

impl Default for FeedPublisher {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl FeedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// The window a feed publishes at `now`.
    pub fn window_for(feed: &Feed, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::around(
            now,
            i64::from(feed.include_past_days),
            i64::from(feed.include_future_days),
        )
    }

    /// Fetches the feed's calendars and renders them as one VCALENDAR.
    ///
    /// # Errors
    ///
    /// [`ServerError::UpstreamFetch`] when every calendar failed.
    pub async fn render(
        &self,
        feed: &Feed,
        source: &dyn CalendarSource,
        now: DateTime<Utc>,
    ) -> ServerResult<RenderedFeed> {
        let options = FetchOptions::new(Self::window_for(feed, now))
            .with_page_size(self.page_size)
            .with_max_pages(self.max_pages);

        let collected = collect_events(source, &feed.calendar_ids, options).await;
        if collected.all_failed(feed.calendar_ids.len()) {
            return Err(ServerError::upstream_fetch(format!(
                "all {} calendars of feed {} failed",
                feed.calendar_ids.len(),
                feed.id
            )));
        }

        let mut calendar = Calendar::new();
        calendar.name(&feed.name);
        for event in &collected.events {
            calendar.push(to_ical_event(event));
        }

        debug!(
            feed_id = feed.id,
            events = collected.events.len(),
            skipped = collected.failed.len(),
            "feed rendered"
        );
        Ok(RenderedFeed {
            body: calendar.done().to_string(),
            filename: format!("{}.ics", feed.name),
        })
    }
}
