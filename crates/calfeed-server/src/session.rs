//! Lazily built identity client bound to the stored settings.
//!
//! [`SessionClient`] keeps at most one live [`IdentityClient`]. It is rebuilt
//! whenever the settings generation moves, so a rotated client secret is never
//! served by a client built from the old one.

use std::sync::Arc;
use std::time::Duration;

use calfeed_providers::graph::{CONSUMERS_AUTHORITY, IdentityConfig, MicrosoftIdentity};
use calfeed_providers::{
    Account, AuthResult, IdentityClient, ProviderResult, TokenCachePersistence,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::credentials::CredentialStore;
use crate::error::{ServerError, ServerResult};

/// Credentials an identity client is built from.
#[derive(Clone)]
pub struct IdentitySettings {
    pub client_id: String,
    pub client_secret: String,
    pub authority: String,
}

impl std::fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authority", &self.authority)
            .finish()
    }
}

/// Constructs identity clients.
pub trait IdentityBuilder: Send + Sync {
    fn build(
        &self,
        settings: IdentitySettings,
        persistence: Arc<dyn TokenCachePersistence>,
    ) -> ProviderResult<Arc<dyn IdentityClient>>;
}

/// Builds [`MicrosoftIdentity`] clients.
#[derive(Debug, Clone)]
pub struct GraphIdentityBuilder {
    timeout: Duration,
}

impl GraphIdentityBuilder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl IdentityBuilder for GraphIdentityBuilder {
    fn build(
        &self,
        settings: IdentitySettings,
        persistence: Arc<dyn TokenCachePersistence>,
    ) -> ProviderResult<Arc<dyn IdentityClient>> {
        let config = IdentityConfig::new(
            settings.client_id,
            settings.client_secret,
            settings.authority,
        )
        .with_timeout(self.timeout);
        Ok(Arc::new(MicrosoftIdentity::new(config, persistence)?))
    }
}

/// Sign-in state reported by `/auth/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub authenticated: bool,
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_expiry: Option<DateTime<Utc>>,
}

struct LiveClient {
    generation: u64,
    client: Arc<dyn IdentityClient>,
}

/// The process-wide identity session.
pub struct SessionClient {
    credentials: Arc<CredentialStore>,
    builder: Arc<dyn IdentityBuilder>,
    scopes: Vec<String>,
    slot: Mutex<Option<LiveClient>>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    pub fn new(
        credentials: Arc<CredentialStore>,
        builder: Arc<dyn IdentityBuilder>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            credentials,
            builder,
            scopes,
            slot: Mutex::new(None),
        }
    }

    /// Returns the live client, building one if there is none or the
    /// settings changed since it was built.
    ///
    /// # Errors
    ///
    /// Configuration error when the client id or secret is missing.
    pub async fn get_client(&self) -> ServerResult<Arc<dyn IdentityClient>> {
        let mut slot = self.slot.lock().await;
        // Read before the settings so a concurrent update forces another rebuild.
        let generation = self.credentials.generation();

        if let Some(live) = slot.as_ref() {
            if live.generation == generation {
                return Ok(live.client.clone());
            }
            debug!(
                built = live.generation,
                current = generation,
                "settings changed, rebuilding identity client"
            );
        }

        let client_id = self
            .credentials
            .get_settings()?
            .client_id
            .filter(|id| !id.is_empty());
        let client_secret = self.credentials.client_secret()?;
        let (Some(client_id), Some(client_secret)) = (client_id, client_secret) else {
            return Err(ServerError::configuration("not configured"));
        };

        let settings = IdentitySettings {
            client_id,
            client_secret,
            authority: CONSUMERS_AUTHORITY.to_string(),
        };
        let persistence: Arc<dyn TokenCachePersistence> = self.credentials.clone();
        let client = self
            .builder
            .build(settings, persistence)
            .map_err(ServerError::from_identity)?;

        *slot = Some(LiveClient {
            generation,
            client: client.clone(),
        });
        info!(generation, "identity client built");
        Ok(client)
    }

    /// Drops the live client; the next call builds a new one.
    pub async fn invalidate(&self) {
        if self.slot.lock().await.take().is_some() {
            debug!("identity client invalidated");
        }
    }

    /// Returns an access token for the first cached account.
    ///
    /// Only one account is supported; additional cached accounts are ignored.
    pub async fn get_valid_access_token(&self) -> ServerResult<AuthResult> {
        let client = self.get_client().await?;
        let accounts = client
            .all_accounts()
            .await
            .map_err(ServerError::from_identity)?;
        let Some(account) = accounts.first() else {
            return Err(ServerError::not_authenticated("no signed-in account"));
        };

        client
            .acquire_token_silent(account, &self.scopes)
            .await
            .map_err(ServerError::from_identity)
    }

    /// URL to send the browser to for sign-in.
    pub async fn auth_code_url(&self) -> ServerResult<String> {
        let redirect_uri = self.credentials.redirect_uri()?;
        let client = self.get_client().await?;
        client
            .auth_code_url(&self.scopes, &redirect_uri)
            .map_err(ServerError::from_identity)
    }

    /// Exchanges the authorization code from the callback.
    pub async fn complete_login(&self, code: &str) -> ServerResult<Account> {
        let redirect_uri = self.credentials.redirect_uri()?;
        let client = self.get_client().await?;
        let result = client
            .acquire_token_by_code(code, &self.scopes, &redirect_uri)
            .await
            .map_err(ServerError::from_identity)?;
        Ok(result.account)
    }

    /// Reports whether a usable session exists.
    ///
    /// Missing configuration and rejected tokens read as signed out;
    /// integrity failures still propagate.
    pub async fn status(&self) -> ServerResult<SessionStatus> {
        match self.get_valid_access_token().await {
            Ok(result) => Ok(SessionStatus {
                authenticated: true,
                account_id: Some(result.account.home_account_id),
                username: Some(result.account.username),
                name: result.account.name,
                access_token_expiry: result.expires_on,
            }),
            Err(err @ ServerError::Integrity { .. }) => Err(err),
            Err(err) => {
                debug!("session status: {err}");
                Ok(SessionStatus::default())
            }
        }
    }

    /// Forgets cached accounts and drops the live client.
    pub async fn logout(&self) -> ServerResult<()> {
        self.credentials.clear_session_cache()?;
        self.invalidate().await;
        info!("signed out");
        Ok(())
    }
}
