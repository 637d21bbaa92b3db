//! Calendar source contract.
//!
//! A [`CalendarSource`] reads calendars and events for one signed-in account.
//! Sources are short-lived: a [`SourceConnector`] builds one per request from
//! a fresh access token, so the source itself never deals with expiry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use calfeed_core::TimeWindow;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::raw_event::RawEvent;

/// Events requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Upper bound on pages followed for one calendar.
pub const DEFAULT_MAX_PAGES: usize = 20;

/// Information about a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarInfo {
    pub id: String,
    pub name: String,
    /// Display color (hex when the provider has one).
    pub color: Option<String>,
    /// Owner display name or address.
    pub owner: Option<String>,
    pub can_edit: bool,
    pub can_share: bool,
    pub is_default_calendar: bool,
}

impl CalendarInfo {
    /// Creates a new CalendarInfo with the given ID and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: None,
            owner: None,
            can_edit: false,
            can_share: false,
            is_default_calendar: false,
        }
    }

    /// Builder method to mark as the account's default calendar.
    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default_calendar = is_default;
        self
    }

    /// Builder method to set the display color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Builder method to set the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Options for listing events in one calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Events overlapping this window are returned.
    pub window: TimeWindow,
    /// Page size requested from the upstream API.
    pub page_size: usize,
    /// Pagination stops after this many pages even if more are available.
    pub max_pages: usize,
}

impl FetchOptions {
    /// Creates options for the given window with default paging.
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Builder method to set the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Builder method to set the page bound.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

/// A boxed future for async trait methods.
///
/// Keeps the traits object-safe so the server can hold `Arc<dyn CalendarSource>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read access to one account's calendars.
///
/// # Example Implementation
///
/// ```ignore
/// impl CalendarSource for FixedSource {
///     fn name(&self) -> &str { "fixed" }
///
///     fn list_events<'a>(
///         &'a self,
///         calendar_id: &'a str,
///         options: FetchOptions,
///     ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
///         Box::pin(async move { Ok(self.events_for(calendar_id, options.window)) })
///     }
///
///     fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
///         Box::pin(async move { Ok(self.calendars.clone()) })
///     }
/// }
/// ```
pub trait CalendarSource: Send + Sync {
    /// Returns the name of this source (e.g., "graph").
    fn name(&self) -> &str;

    /// Lists the events of `calendar_id` overlapping `options.window`.
    ///
    /// Pagination is handled internally and bounded by `options.max_pages`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` on network errors, authentication failures,
    /// unknown calendars and malformed responses.
    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        options: FetchOptions,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>>;

    /// Lists every calendar visible to the account, without duplicates.
    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>>;
}

/// Builds a [`CalendarSource`] bound to an access token.
pub trait SourceConnector: Send + Sync {
    /// Returns a source that authenticates with `access_token`.
    fn connect(&self, access_token: &str) -> ProviderResult<Arc<dyn CalendarSource>>;
}
