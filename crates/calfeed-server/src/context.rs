//! Process-wide state shared by the HTTP routes and the scheduler.

use std::sync::Arc;

use calfeed_providers::graph::{GraphConnector, default_scopes};
use calfeed_providers::{CalendarSource, SourceConnector};
use tracing::info;

use crate::config::ServerConfig;
use crate::credentials::CredentialStore;
use crate::error::{ServerError, ServerResult};
use crate::models::Feed;
use crate::publisher::FeedPublisher;
use crate::registry::{FeedRegistry, feed_url};
use crate::scheduler::{RefreshScheduler, SchedulerConfig};
use crate::session::{GraphIdentityBuilder, IdentityBuilder, SessionClient};
use crate::store::Database;

/// Everything a request handler needs.
pub struct AppContext {
    pub config: ServerConfig,
    pub db: Arc<Database>,
    pub credentials: Arc<CredentialStore>,
    pub session: SessionClient,
    pub registry: FeedRegistry,
    pub publisher: FeedPublisher,
    connector: Arc<dyn SourceConnector>,
}

/// Shared handle to the context.
pub type SharedContext = Arc<AppContext>;

impl AppContext {
    /// Opens the database at `config.db_path` and wires the Microsoft
    /// identity and Graph backends.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let db = Arc::new(Database::open(&config.db_path)?);
        info!(path = %config.db_path.display(), "database opened");
        let builder = Arc::new(GraphIdentityBuilder::new(config.fetch_timeout));
        let connector = Arc::new(GraphConnector::new(config.fetch_timeout));
        Ok(Self::with_parts(config, db, builder, connector))
    }

    /// Assembles a context from explicit backends.
    pub fn with_parts(
        config: ServerConfig,
        db: Arc<Database>,
        builder: Arc<dyn IdentityBuilder>,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        let credentials = Arc::new(CredentialStore::new(db.clone()));
        let session = SessionClient::new(credentials.clone(), builder, default_scopes());
        Self {
            registry: FeedRegistry::new(db.clone()),
            publisher: FeedPublisher::new(),
            config,
            db,
            credentials,
            session,
            connector,
        }
    }

    /// A calendar source authenticated as the signed-in account.
    pub async fn calendar_source(&self) -> ServerResult<Arc<dyn CalendarSource>> {
        let token = self.session.get_valid_access_token().await?;
        self.connect(&token.access_token)
    }

    /// A calendar source for an access token already acquired.
    pub fn connect(&self, access_token: &str) -> ServerResult<Arc<dyn CalendarSource>> {
        self.connector
            .connect(access_token)
            .map_err(ServerError::from)
    }

    /// Public URL of `feed`.
    pub fn feed_url(&self, feed: &Feed) -> ServerResult<String> {
        Ok(feed_url(&self.credentials.base_url()?, &feed.token))
    }

    /// A scheduler over this context's feeds.
    pub fn scheduler(&self) -> RefreshScheduler {
        let config = SchedulerConfig::new(self.config.tick_interval)
            .with_refresh_timeout(self.config.refresh_timeout);
        RefreshScheduler::new(config, self.registry.clone())
    }
}
