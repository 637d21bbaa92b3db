//! Microsoft Graph calendar API client.
//!
//! Low-level HTTP access to `/me/calendars` and `calendarView`, plus the
//! conversion from Graph event JSON to [`RawEvent`].

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use calfeed_core::TimeWindow;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CalendarInfo, FetchOptions};
use crate::raw_event::{RawEvent, RawEventTime};

/// Base URL for Microsoft Graph v1.0.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Asks Graph to report event times in UTC.
const PREFER_UTC: &str = "outlook.timezone=\"UTC\"";

/// Graph event list page.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    #[serde(default)]
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body_preview: Option<String>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    #[serde(default)]
    is_all_day: bool,
    #[serde(default)]
    is_cancelled: bool,
    #[serde(default)]
    location: Option<GraphLocation>,
    #[serde(default)]
    show_as: Option<String>,
    #[serde(default)]
    sensitivity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphOwner {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphCalendar {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    hex_color: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    owner: Option<GraphOwner>,
    #[serde(default)]
    can_edit: bool,
    #[serde(default)]
    can_share: bool,
    #[serde(default)]
    is_default_calendar: bool,
}

#[derive(Debug, Deserialize)]
struct GraphCalendarGroup {
    id: String,
}

impl From<GraphCalendar> for CalendarInfo {
    fn from(cal: GraphCalendar) -> Self {
        let color = cal
            .hex_color
            .filter(|c| !c.is_empty())
            .or(cal.color.filter(|c| !c.is_empty()));
        let owner = cal.owner.and_then(|o| o.name.or(o.address));
        CalendarInfo {
            id: cal.id,
            name: cal.name,
            color,
            owner,
            can_edit: cal.can_edit,
            can_share: cal.can_share,
            is_default_calendar: cal.is_default_calendar,
        }
    }
}

/// Resolves a Graph `dateTimeTimeZone` pair to a [`RawEventTime`].
///
/// Zone-less and UTC values are read as UTC. IANA zone names are converted
/// through `chrono-tz`; anything else (Windows zone names, typos) is logged
/// and read as UTC. For all-day events only the date part is kept.
pub fn parse_graph_time(
    date_time: &str,
    time_zone: Option<&str>,
    all_day: bool,
) -> Option<RawEventTime> {
    let date_time = date_time.trim();

    // An explicit offset wins over the zone name.
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_time) {
        let utc = dt.with_timezone(&Utc);
        return Some(if all_day {
            RawEventTime::Date(dt.date_naive())
        } else {
            RawEventTime::DateTime(utc)
        });
    }

    let naive = NaiveDateTime::parse_from_str(date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(date_time, "%Y-%m-%dT%H:%M"))
        .map_err(|e| warn!(value = date_time, "unparseable event time: {e}"))
        .ok()?;

    if all_day {
        return Some(RawEventTime::Date(naive.date()));
    }

    let utc = match time_zone.map(str::trim) {
        None | Some("") => naive.and_utc(),
        Some(zone) if is_utc_name(zone) => naive.and_utc(),
        Some(zone) => match zone.parse::<chrono_tz::Tz>() {
            Ok(tz) => match tz.from_local_datetime(&naive).earliest() {
                Some(local) => local.with_timezone(&Utc),
                // Skipped by a DST transition; the wall time does not exist.
                None => naive.and_utc(),
            },
            Err(_) => {
                warn!(zone, "unknown time zone, treating event time as UTC");
                naive.and_utc()
            }
        },
    };
    Some(RawEventTime::DateTime(utc))
}

fn is_utc_name(zone: &str) -> bool {
    matches!(
        zone.to_ascii_lowercase().as_str(),
        "utc" | "etc/utc" | "gmt" | "etc/gmt" | "z" | "tzone://microsoft/utc"
    )
}

fn convert_event(event: GraphEvent, calendar_id: &str) -> Option<RawEvent> {
    if event.is_cancelled {
        return None;
    }
    let id = event.id?;
    let (Some(start), Some(end)) = (event.start, event.end) else {
        warn!(event_id = %id, "event has no start or end, skipping");
        return None;
    };
    let start = parse_graph_time(&start.date_time, start.time_zone.as_deref(), event.is_all_day)?;
    let end = parse_graph_time(&end.date_time, end.time_zone.as_deref(), event.is_all_day)?;

    let mut raw = RawEvent::new(id, calendar_id, start, end);
    raw.summary = event.subject;
    raw.description = event.body_preview.filter(|s| !s.is_empty());
    raw.location = event
        .location
        .and_then(|l| l.display_name)
        .filter(|s| !s.is_empty());
    raw.show_as = event.show_as;
    raw.sensitivity = event.sensitivity;
    Some(raw)
}

/// Microsoft Graph calendar client for one access token.
#[derive(Debug)]
pub struct GraphCalendarClient {
    http_client: reqwest::Client,
    access_token: String,
    base_url: String,
}

impl GraphCalendarClient {
    /// Creates a client authenticating with `access_token`.
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::internal(format!("failed to build HTTP client: {e}")).with_source(e)
            })?;

        Ok(Self {
            http_client,
            access_token: access_token.into(),
            base_url: GRAPH_API_BASE.to_string(),
        })
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> ProviderResult<T> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.access_token)
            .header("Prefer", PREFER_UTC)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::network("request timeout")
                } else if e.is_connect() {
                    ProviderError::network(format!("connection failed: {e}"))
                } else {
                    ProviderError::network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::authentication("access token expired or invalid")
                .with_provider("graph"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ProviderError::from_http_status(status.as_u16(), &body)
                .with_provider("graph"));
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse response: {e}"))
                .with_provider("graph")
        })
    }

    /// Follows `@odata.nextLink` from `first_url`, stopping after `max_pages`.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        first_url: String,
        first_query: Vec<(&str, String)>,
        max_pages: usize,
    ) -> ProviderResult<Vec<T>> {
        let mut items = Vec::new();
        let mut url = first_url;
        let mut query = first_query;

        for page_no in 1..=max_pages {
            let page: Page<T> = self.get_json(&url, &query).await?;
            items.extend(page.value);
            match page.next_link {
                Some(next) if page_no < max_pages => {
                    // nextLink already carries every query parameter.
                    url = next;
                    query = Vec::new();
                }
                Some(_) => {
                    warn!(max_pages, "page limit reached, results truncated");
                    break;
                }
                None => break,
            }
        }
        Ok(items)
    }

    /// Lists event instances of `calendar_id` overlapping `options.window`.
    pub async fn list_events(
        &self,
        calendar_id: &str,
        options: FetchOptions,
    ) -> ProviderResult<Vec<RawEvent>> {
        let url = format!(
            "{}/me/calendars/{}/calendarView",
            self.base_url,
            urlencoding::encode(calendar_id)
        );
        let query = window_query(&options.window, options.page_size);

        let events: Vec<GraphEvent> = self.get_paged(url, query, options.max_pages).await?;
        let raw: Vec<RawEvent> = events
            .into_iter()
            .filter_map(|e| convert_event(e, calendar_id))
            .collect();

        debug!(calendar_id, count = raw.len(), "fetched events");
        Ok(raw)
    }

    /// Lists top-level calendars plus the calendars of every calendar group,
    /// de-duplicated by id in first-seen order.
    ///
    /// Calendar groups are best-effort: a failure there is logged and the
    /// top-level list returned alone.
    pub async fn list_calendars(&self) -> ProviderResult<Vec<CalendarInfo>> {
        let mut calendars: Vec<GraphCalendar> = self
            .get_paged(format!("{}/me/calendars", self.base_url), Vec::new(), 10)
            .await?;

        match self.list_group_calendars().await {
            Ok(grouped) => calendars.extend(grouped),
            Err(e) => debug!("could not fetch calendar groups: {e}"),
        }

        let mut seen = HashSet::new();
        Ok(calendars
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .map(CalendarInfo::from)
            .collect())
    }

    async fn list_group_calendars(&self) -> ProviderResult<Vec<GraphCalendar>> {
        let groups: Vec<GraphCalendarGroup> = self
            .get_paged(format!("{}/me/calendarGroups", self.base_url), Vec::new(), 10)
            .await?;

        let mut calendars = Vec::new();
        for group in groups {
            let url = format!(
                "{}/me/calendarGroups/{}/calendars",
                self.base_url,
                urlencoding::encode(&group.id)
            );
            let mut page: Vec<GraphCalendar> = self.get_paged(url, Vec::new(), 10).await?;
            calendars.append(&mut page);
        }
        Ok(calendars)
    }
}

fn window_query(window: &TimeWindow, page_size: usize) -> Vec<(&'static str, String)> {
    vec![
        (
            "startDateTime",
            window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (
            "endDateTime",
            window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        ("$top", page_size.to_string()),
    ]
}
