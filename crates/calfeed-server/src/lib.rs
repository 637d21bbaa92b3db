//! Daemon: credential store, feed registry, refresh scheduler, iCal publishing.
//!
//! This crate provides the calfeed server that:
//! - Stores provider credentials and the sign-in session encrypted at rest
//! - Manages feeds, each published under a secret token URL
//! - Renders feeds as iCalendar documents from the signed-in account's calendars
//! - Refreshes due feeds in the background
//!
//! # Example
//!
//! ```rust,no_run
//! use calfeed_server::{ServerConfig, run};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     run(ServerConfig::default()).await?;
//!     Ok(())
//! }
//! ```

mod cipher;
mod config;
mod context;
mod credentials;
mod daemon;
mod error;
mod http;
mod models;
mod publisher;
mod registry;
mod scheduler;
mod session;
mod signals;
mod store;
#[cfg(test)]
mod testing;

pub use cipher::SecretCipher;
pub use config::{DEFAULT_BASE_URL, DEFAULT_PORT, ServerConfig, default_db_path};
pub use context::{AppContext, SharedContext};
pub use credentials::{CredentialStore, SettingsUpdate};
pub use daemon::run;
pub use error::{ServerError, ServerResult};
pub use http::{ApiError, router};
pub use models::{Feed, Settings, UiSelection};
pub use publisher::{Collected, FeedPublisher, RenderedFeed, collect_events};
pub use registry::{FeedRegistry, FeedUpdate, NewFeed, TOKEN_LEN, feed_url};
pub use scheduler::{
    RefreshAction, RefreshScheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle,
    SchedulerState, SharedSchedulerState, TickReport, TimestampOnly, is_due,
};
pub use session::{
    GraphIdentityBuilder, IdentityBuilder, IdentitySettings, SessionClient, SessionStatus,
};
pub use signals::{Shutdown, ShutdownSignal};
pub use store::{APP_SECRET_LEN, Database, NewFeedRow};
