//! Identity-provider contract.
//!
//! An [`IdentityClient`] performs the OAuth authorization-code flow and hands
//! out access tokens for cached accounts. The token cache lives outside the
//! client: before every token operation the client calls
//! [`TokenCachePersistence::load`], and afterwards
//! [`TokenCachePersistence::save`] with a flag saying whether the cache
//! changed. The server persists the blob encrypted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::provider::BoxFuture;

/// An account known to the identity provider's token cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable account key (`<object id>.<tenant id>`).
    pub home_account_id: String,
    /// Sign-in name, usually an email address.
    pub username: String,
    /// Display name, when the provider returned one.
    pub name: Option<String>,
}

impl Account {
    pub fn new(home_account_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            home_account_id: home_account_id.into(),
            username: username.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The outcome of a successful token acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    /// Bearer token for the calendar API.
    pub access_token: String,
    /// When `access_token` stops being accepted.
    pub expires_on: Option<DateTime<Utc>>,
    /// The account the token belongs to.
    pub account: Account,
}

/// Storage hooks for the serialized token cache.
pub trait TokenCachePersistence: Send + Sync {
    /// Returns the last saved blob, or `None` if nothing was ever saved.
    fn load(&self) -> ProviderResult<Option<String>>;

    /// Called after every token operation. Implementations write only when
    /// `changed` is true.
    fn save(&self, blob: &str, changed: bool) -> ProviderResult<()>;
}

/// OAuth client for the identity provider.
pub trait IdentityClient: Send + Sync {
    /// Builds the URL the browser is redirected to for sign-in.
    fn auth_code_url(&self, scopes: &[String], redirect_uri: &str) -> ProviderResult<String>;

    /// Exchanges an authorization code for tokens and caches the account.
    fn acquire_token_by_code<'a>(
        &'a self,
        code: &'a str,
        scopes: &'a [String],
        redirect_uri: &'a str,
    ) -> BoxFuture<'a, ProviderResult<AuthResult>>;

    /// Returns a valid access token for a cached account, refreshing it if needed.
    ///
    /// # Errors
    ///
    /// Fails with an authentication error when the account is unknown or the
    /// refresh token was rejected.
    fn acquire_token_silent<'a>(
        &'a self,
        account: &'a Account,
        scopes: &'a [String],
    ) -> BoxFuture<'a, ProviderResult<AuthResult>>;

    /// Lists the accounts in the token cache, in insertion order.
    fn all_accounts(&self) -> BoxFuture<'_, ProviderResult<Vec<Account>>>;
}
