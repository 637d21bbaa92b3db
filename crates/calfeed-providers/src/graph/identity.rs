//! Microsoft identity platform client (confidential web app flow).
//!
//! Implements [`IdentityClient`] against the v2.0 authorize/token endpoints:
//! the authorization-code grant for sign-in and the refresh-token grant for
//! silent acquisition. Accounts are derived from the `id_token` claims.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{Account, AuthResult, IdentityClient, TokenCachePersistence};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::BoxFuture;

use super::token_cache::{CacheEntry, TokenCache};

/// Credentials and endpoints for a confidential client.
#[derive(Clone)]
pub struct IdentityConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Authority base, e.g. `https://login.microsoftonline.com/consumers`.
    pub authority: String,
    /// Timeout applied to token endpoint requests.
    pub timeout: Duration,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authority", &self.authority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl IdentityConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authority: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority: authority.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.authority.trim_end_matches('/'))
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority.trim_end_matches('/'))
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// The `id_token` claims we read.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    tid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Decodes the payload of an unverified JWT into an [`Account`].
///
/// The token came straight from the token endpoint over TLS, so the
/// signature is not checked.
fn account_from_id_token(id_token: &str) -> ProviderResult<Account> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| ProviderError::invalid_response("id_token is not a JWT"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ProviderError::invalid_response(format!("id_token payload: {e}")))?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::invalid_response(format!("id_token claims: {e}")))?;

    let home_account_id = match (claims.oid, claims.tid, claims.sub) {
        (Some(oid), Some(tid), _) => format!("{oid}.{tid}"),
        (Some(oid), None, _) => oid,
        (None, _, Some(sub)) => sub,
        (None, _, None) => {
            return Err(ProviderError::invalid_response(
                "id_token has neither oid nor sub",
            ));
        }
    };
    let username = claims
        .preferred_username
        .or(claims.email)
        .unwrap_or_default();

    Ok(Account {
        home_account_id,
        username,
        name: claims.name,
    })
}

fn parse_scopes(scope: Option<&str>, requested: &[String]) -> Vec<String> {
    match scope {
        Some(s) if !s.trim().is_empty() => s.split_whitespace().map(String::from).collect(),
        _ => requested.to_vec(),
    }
}

/// Confidential client for the Microsoft identity platform.
pub struct MicrosoftIdentity {
    config: IdentityConfig,
    http_client: reqwest::Client,
    persistence: Arc<dyn TokenCachePersistence>,
    /// Serializes load/modify/save cycles on the token cache.
    cache_lock: Mutex<()>,
}

impl std::fmt::Debug for MicrosoftIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrosoftIdentity")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MicrosoftIdentity {
    /// Creates a client that stores its token cache through `persistence`.
    pub fn new(
        config: IdentityConfig,
        persistence: Arc<dyn TokenCachePersistence>,
    ) -> ProviderResult<Self> {
        if config.client_id.trim().is_empty() || config.client_secret.is_empty() {
            return Err(ProviderError::configuration(
                "client id and client secret are required",
            ));
        }
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ProviderError::internal(format!("failed to build HTTP client: {e}")).with_source(e)
            })?;

        Ok(Self {
            config,
            http_client,
            persistence,
            cache_lock: Mutex::new(()),
        })
    }

    fn load_cache(&self) -> ProviderResult<TokenCache> {
        let blob = self.persistence.load()?;
        TokenCache::deserialize(blob.as_deref())
    }

    fn save_cache(&self, cache: &TokenCache, changed: bool) -> ProviderResult<()> {
        let blob = cache.serialize()?;
        self.persistence.save(&blob, changed)
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> ProviderResult<TokenResponse> {
        let response = self
            .http_client
            .post(self.config.token_endpoint())
            .form(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::network("token request timed out")
                } else {
                    ProviderError::network(format!("token request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            // The token endpoint answers 400 invalid_grant for revoked or
            // expired refresh tokens and bad codes.
            return Err(ProviderError::from_http_status(status.as_u16(), &body)
                .with_provider("identity"));
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::invalid_response(format!("invalid token response: {e}")))
    }

    fn entry_from_response(
        &self,
        response: TokenResponse,
        account: Account,
        scopes: &[String],
    ) -> CacheEntry {
        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        CacheEntry {
            account,
            access_token: Some(response.access_token),
            expires_at,
            refresh_token: response.refresh_token,
            scopes: parse_scopes(response.scope.as_deref(), scopes),
        }
    }
}

fn auth_result(entry: &CacheEntry) -> AuthResult {
    AuthResult {
        access_token: entry.access_token.clone().unwrap_or_default(),
        expires_on: entry.expires_at,
        account: entry.account.clone(),
    }
}

impl IdentityClient for MicrosoftIdentity {
    fn auth_code_url(&self, scopes: &[String], redirect_uri: &str) -> ProviderResult<String> {
        let scope = scopes.join(" ");
        let url = url::Url::parse_with_params(
            &self.config.authorize_endpoint(),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("response_mode", "query"),
                ("scope", scope.as_str()),
            ],
        )
        .map_err(|e| ProviderError::configuration(format!("invalid authority URL: {e}")))?;
        Ok(url.into())
    }

    fn acquire_token_by_code<'a>(
        &'a self,
        code: &'a str,
        scopes: &'a [String],
        redirect_uri: &'a str,
    ) -> BoxFuture<'a, ProviderResult<AuthResult>> {
        Box::pin(async move {
            if code.is_empty() {
                return Err(ProviderError::authentication("missing authorization code"));
            }
            let _guard = self.cache_lock.lock().await;
            let mut cache = self.load_cache()?;

            let scope = scopes.join(" ");
            let response = self
                .request_token(&[
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("scope", scope.as_str()),
                ])
                .await
                .map_err(|e| {
                    if e.is_authentication() {
                        ProviderError::authentication(format!(
                            "authorization code rejected: {}",
                            e.message()
                        ))
                    } else {
                        e
                    }
                })?;

            let id_token = response
                .id_token
                .as_deref()
                .ok_or_else(|| ProviderError::invalid_response("token response has no id_token"))?;
            let account = account_from_id_token(id_token)?;
            let entry = self.entry_from_response(response, account, scopes);
            let result = auth_result(&entry);

            cache.upsert(entry);
            self.save_cache(&cache, true)?;
            info!(username = %result.account.username, "signed in");
            Ok(result)
        })
    }

    fn acquire_token_silent<'a>(
        &'a self,
        account: &'a Account,
        scopes: &'a [String],
    ) -> BoxFuture<'a, ProviderResult<AuthResult>> {
        Box::pin(async move {
            let _guard = self.cache_lock.lock().await;
            let mut cache = self.load_cache()?;

            let entry = cache.entry(&account.home_account_id).ok_or_else(|| {
                ProviderError::authentication("account is not in the token cache")
            })?;

            if entry.usable_access_token(scopes, Utc::now()).is_some() {
                debug!("using cached access token");
                let result = auth_result(entry);
                self.save_cache(&cache, false)?;
                return Ok(result);
            }

            let refresh_token = entry.refresh_token.clone().ok_or_else(|| {
                ProviderError::authentication("no refresh token cached, sign in again")
            })?;
            let cached_account = entry.account.clone();

            let scope = scopes.join(" ");
            let response = self
                .request_token(&[
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("scope", scope.as_str()),
                ])
                .await
                .map_err(|e| {
                    if e.is_authentication() {
                        warn!("refresh token rejected");
                        ProviderError::authentication(format!(
                            "token refresh failed: {}",
                            e.message()
                        ))
                    } else {
                        e
                    }
                })?;

            let account = match response.id_token.as_deref() {
                Some(id_token) => account_from_id_token(id_token).unwrap_or(cached_account),
                None => cached_account,
            };
            let entry = self.entry_from_response(response, account, scopes);
            let result = auth_result(&entry);

            cache.upsert(entry);
            self.save_cache(&cache, true)?;
            debug!("refreshed access token");
            Ok(result)
        })
    }

    fn all_accounts(&self) -> BoxFuture<'_, ProviderResult<Vec<Account>>> {
        Box::pin(async move {
            let _guard = self.cache_lock.lock().await;
            let cache = self.load_cache()?;
            let accounts = cache.accounts();
            self.save_cache(&cache, false)?;
            Ok(accounts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryPersistence {
        blob: StdMutex<Option<String>>,
        writes: StdMutex<u32>,
    }

    impl TokenCachePersistence for MemoryPersistence {
        fn load(&self) -> ProviderResult<Option<String>> {
            Ok(self.blob.lock().unwrap().clone())
        }

        fn save(&self, blob: &str, changed: bool) -> ProviderResult<()> {
            if changed {
                *self.blob.lock().unwrap() = Some(blob.to_string());
                *self.writes.lock().unwrap() += 1;
            }
            Ok(())
        }
    }

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    fn client(persistence: Arc<MemoryPersistence>) -> MicrosoftIdentity {
        MicrosoftIdentity::new(
            IdentityConfig::new(
                "client-id",
                "s3cret",
                "https://login.microsoftonline.com/consumers/",
            ),
            persistence,
        )
        .unwrap()
    }

    #[test]
    fn account_from_claims() {
        let token = jwt(serde_json::json!({
            "oid": "o1", "tid": "t1",
            "preferred_username": "ada@example.com",
            "name": "Ada"
        }));
        let account = account_from_id_token(&token).unwrap();
        assert_eq!(account.home_account_id, "o1.t1");
        assert_eq!(account.username, "ada@example.com");
        assert_eq!(account.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn account_falls_back_to_sub() {
        let token = jwt(serde_json::json!({"sub": "s1", "email": "x@example.com"}));
        let account = account_from_id_token(&token).unwrap();
        assert_eq!(account.home_account_id, "s1");
        assert_eq!(account.username, "x@example.com");
    }

    #[test]
    fn malformed_id_token_is_rejected() {
        assert!(account_from_id_token("nodots").is_err());
        assert!(account_from_id_token("a.!!!.c").is_err());
        assert!(account_from_id_token(&jwt(serde_json::json!({"name": "x"}))).is_err());
    }

    #[test]
    fn requires_credentials() {
        let err = MicrosoftIdentity::new(
            IdentityConfig::new("", "secret", "https://login.example"),
            Arc::new(MemoryPersistence::default()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ProviderErrorKind::Configuration);
    }

    #[test]
    fn config_debug_hides_secret() {
        let config = IdentityConfig::new("id", "hunter2", "https://login.example");
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn auth_url_contains_parameters() {
        let identity = client(Arc::new(MemoryPersistence::default()));
        let scopes = vec!["openid".to_string(), "Calendars.Read".to_string()];
        let url = identity
            .auth_code_url(&scopes, "http://localhost:5600/auth/callback")
            .unwrap();

        assert!(url.starts_with(
            "https://login.microsoftonline.com/consumers/oauth2/v2.0/authorize?"
        ));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A5600%2Fauth%2Fcallback"));
        assert!(url.contains("scope=openid+Calendars.Read"));
    }

    #[tokio::test]
    async fn silent_uses_cached_token_without_writing() {
        let persistence = Arc::new(MemoryPersistence::default());
        let account = Account::new("o1.t1", "ada@example.com");
        let mut cache = TokenCache::default();
        cache.upsert(CacheEntry {
            account: account.clone(),
            access_token: Some("cached-at".into()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            refresh_token: Some("rt".into()),
            scopes: vec!["Calendars.Read".into()],
        });
        *persistence.blob.lock().unwrap() = Some(cache.serialize().unwrap());

        let identity = client(persistence.clone());
        let scopes = vec!["openid".to_string(), "Calendars.Read".to_string()];
        let result = identity.acquire_token_silent(&account, &scopes).await.unwrap();

        assert_eq!(result.access_token, "cached-at");
        assert_eq!(result.account, account);
        assert_eq!(*persistence.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn silent_unknown_account_is_authentication_error() {
        let identity = client(Arc::new(MemoryPersistence::default()));
        let err = identity
            .acquire_token_silent(&Account::new("nobody", "x"), &[])
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn silent_without_refresh_token_is_authentication_error() {
        let persistence = Arc::new(MemoryPersistence::default());
        let account = Account::new("o1.t1", "ada@example.com");
        let mut cache = TokenCache::default();
        cache.upsert(CacheEntry {
            account: account.clone(),
            access_token: None,
            expires_at: None,
            refresh_token: None,
            scopes: vec![],
        });
        *persistence.blob.lock().unwrap() = Some(cache.serialize().unwrap());

        let identity = client(persistence);
        let err = identity
            .acquire_token_silent(&account, &["Calendars.Read".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn all_accounts_reads_persisted_cache() {
        let persistence = Arc::new(MemoryPersistence::default());
        let identity = client(persistence.clone());
        assert!(identity.all_accounts().await.unwrap().is_empty());

        let mut cache = TokenCache::default();
        cache.upsert(CacheEntry {
            account: Account::new("o1.t1", "ada@example.com"),
            access_token: None,
            expires_at: None,
            refresh_token: Some("rt".into()),
            scopes: vec![],
        });
        *persistence.blob.lock().unwrap() = Some(cache.serialize().unwrap());

        let accounts = identity.all_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].username, "ada@example.com");
    }
}
