//! Identity and calendar-source contracts, with a Microsoft Graph backend.
//!
//! - [`IdentityClient`] - OAuth sign-in and silent token acquisition, with the
//!   token cache stored through [`TokenCachePersistence`]
//! - [`CalendarSource`] - read calendars and events for one access token
//! - [`RawEvent`] - provider-agnostic event data
//! - [`ProviderError`] - error type for both contracts
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐      ┌────────────────────┐
//! │ Microsoft identity │      │  Microsoft Graph   │
//! └─────────┬──────────┘      └─────────┬──────────┘
//!           │                           │
//!           ▼                           ▼
//! ┌────────────────────┐      ┌────────────────────┐
//! │ MicrosoftIdentity  │      │ GraphCalendarClient│
//! └─────────┬──────────┘      └─────────┬──────────┘
//!           │ IdentityClient            │ CalendarSource
//!           ▼                           ▼
//!     access token ───── SourceConnector ────▶ RawEvent
//! ```

pub mod auth;
pub mod error;
#[cfg(feature = "graph")]
pub mod graph;
pub mod provider;
pub mod raw_event;

pub use auth::{Account, AuthResult, IdentityClient, TokenCachePersistence};
pub use error::{ProviderError, ProviderErrorKind, ProviderResult};
pub use provider::{
    BoxFuture, CalendarInfo, CalendarSource, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE,
    FetchOptions, SourceConnector,
};
pub use raw_event::{RawEvent, RawEventTime};
