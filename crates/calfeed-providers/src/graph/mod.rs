//! Microsoft 365 / Outlook backend.
//!
//! - [`MicrosoftIdentity`]: sign-in and token refresh against the Microsoft
//!   identity platform
//! - [`GraphCalendarClient`]: calendar and event reads from Microsoft Graph
//! - [`GraphConnector`]: turns an access token into a [`CalendarSource`]

mod client;
mod identity;
mod token_cache;

use std::sync::Arc;
use std::time::Duration;

pub use client::{GRAPH_API_BASE, GraphCalendarClient, parse_graph_time};
pub use identity::{IdentityConfig, MicrosoftIdentity};
pub use token_cache::{CacheEntry, TokenCache};

use crate::error::ProviderResult;
use crate::provider::{BoxFuture, CalendarInfo, CalendarSource, FetchOptions, SourceConnector};
use crate::raw_event::RawEvent;

/// Authority for personal Microsoft accounts.
pub const CONSUMERS_AUTHORITY: &str = "https://login.microsoftonline.com/consumers";

/// Scopes requested at sign-in and for every silent token.
pub const GRAPH_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access", "Calendars.Read"];

/// Returns [`GRAPH_SCOPES`] as owned strings.
pub fn default_scopes() -> Vec<String> {
    GRAPH_SCOPES.iter().map(|s| s.to_string()).collect()
}

impl CalendarSource for GraphCalendarClient {
    fn name(&self) -> &str {
        "graph"
    }

    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        options: FetchOptions,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(GraphCalendarClient::list_events(self, calendar_id, options))
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(GraphCalendarClient::list_calendars(self))
    }
}

/// Builds [`GraphCalendarClient`]s for access tokens.
#[derive(Debug, Clone)]
pub struct GraphConnector {
    timeout: Duration,
    base_url: String,
}

impl GraphConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            base_url: GRAPH_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for GraphConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl SourceConnector for GraphConnector {
    fn connect(&self, access_token: &str) -> ProviderResult<Arc<dyn CalendarSource>> {
        let client =
            GraphCalendarClient::new(access_token, self.timeout)?.with_base_url(&self.base_url);
        Ok(Arc::new(client))
    }
}
