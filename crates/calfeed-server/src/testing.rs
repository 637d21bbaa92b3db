//! In-memory identity and calendar fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use calfeed_providers::{
    Account, AuthResult, BoxFuture, CalendarInfo, CalendarSource, FetchOptions, IdentityClient,
    ProviderError, ProviderResult, RawEvent, SourceConnector, TokenCachePersistence,
};
use chrono::{Duration, Utc};

use crate::cipher::LegacyAes256Gcm;
use crate::session::{IdentityBuilder, IdentitySettings};
use crate::store::APP_SECRET_LEN;

/// Seals `plaintext` the way earlier releases did: 128-bit nonce,
/// `hex(nonce):hex(tag):hex(ciphertext)`.
pub(crate) fn legacy_envelope(key: &[u8; APP_SECRET_LEN], plaintext: &str) -> String {
    use aes_gcm::aead::consts::U16;
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Key, Nonce};

    let nonce = [0x5au8; 16];
    let sealed = LegacyAes256Gcm::new(Key::<LegacyAes256Gcm>::from_slice(key))
        .encrypt(Nonce::<U16>::from_slice(&nonce), plaintext.as_bytes())
        .unwrap();
    let (ciphertext, tag) = sealed.split_at(sealed.len() - 16);
    format!(
        "{}:{}:{}",
        hex::encode(nonce),
        hex::encode(tag),
        hex::encode(ciphertext)
    )
}

/// Counts builds and hands out [`FakeIdentity`] clients.
#[derive(Default)]
pub(crate) struct FakeIdentityBuilder {
    builds: AtomicUsize,
    reject_silent: Arc<AtomicBool>,
    last_secret: Mutex<Option<String>>,
}

impl FakeIdentityBuilder {
    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub(crate) fn last_secret(&self) -> Option<String> {
        self.last_secret.lock().unwrap().clone()
    }

    /// Makes every silent acquisition fail as if the refresh token was revoked.
    pub(crate) fn reject_silent(&self, reject: bool) {
        self.reject_silent.store(reject, Ordering::SeqCst);
    }
}

impl IdentityBuilder for FakeIdentityBuilder {
    fn build(
        &self,
        settings: IdentitySettings,
        persistence: Arc<dyn TokenCachePersistence>,
    ) -> ProviderResult<Arc<dyn IdentityClient>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        *self.last_secret.lock().unwrap() = Some(settings.client_secret.clone());
        Ok(Arc::new(FakeIdentity {
            settings,
            persistence,
            reject_silent: self.reject_silent.clone(),
        }))
    }
}

/// Identity client whose token cache is a JSON list of accounts.
pub(crate) struct FakeIdentity {
    settings: IdentitySettings,
    persistence: Arc<dyn TokenCachePersistence>,
    reject_silent: Arc<AtomicBool>,
}

impl FakeIdentity {
    fn load_accounts(&self) -> ProviderResult<Vec<Account>> {
        match self.persistence.load()? {
            Some(blob) => serde_json::from_str(&blob)
                .map_err(|e| ProviderError::invalid_response(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    fn token_for(&self, account: Account) -> AuthResult {
        AuthResult {
            access_token: format!("access-{}", self.settings.client_secret),
            expires_on: Some(Utc::now() + Duration::hours(1)),
            account,
        }
    }
}

impl IdentityClient for FakeIdentity {
    fn auth_code_url(&self, scopes: &[String], redirect_uri: &str) -> ProviderResult<String> {
        Ok(format!(
            "https://login.example/authorize?client_id={}&redirect_uri={}&scope={}",
            self.settings.client_id,
            redirect_uri,
            scopes.join(" ")
        ))
    }

    fn acquire_token_by_code<'a>(
        &'a self,
        code: &'a str,
        _scopes: &'a [String],
        _redirect_uri: &'a str,
    ) -> BoxFuture<'a, ProviderResult<AuthResult>> {
        Box::pin(async move {
            if code == "bad" {
                return Err(ProviderError::authentication("invalid_grant"));
            }
            let account = Account::new("oid.tid", "ada@example.com").with_name("Ada");
            let mut accounts = self.load_accounts()?;
            if !accounts.contains(&account) {
                accounts.push(account.clone());
            }
            let blob = serde_json::to_string(&accounts)
                .map_err(|e| ProviderError::internal(e.to_string()))?;
            self.persistence.save(&blob, true)?;
            Ok(self.token_for(account))
        })
    }

    fn acquire_token_silent<'a>(
        &'a self,
        account: &'a Account,
        _scopes: &'a [String],
    ) -> BoxFuture<'a, ProviderResult<AuthResult>> {
        Box::pin(async move {
            if self.reject_silent.load(Ordering::SeqCst) {
                return Err(ProviderError::authentication("invalid_grant"));
            }
            if !self.load_accounts()?.contains(account) {
                return Err(ProviderError::authentication("account not in cache"));
            }
            Ok(self.token_for(account.clone()))
        })
    }

    fn all_accounts(&self) -> BoxFuture<'_, ProviderResult<Vec<Account>>> {
        Box::pin(async move { self.load_accounts() })
    }
}

/// Calendar source serving fixed events.
#[derive(Default)]
pub(crate) struct FakeSource {
    calendars: Vec<CalendarInfo>,
    events: HashMap<String, Vec<RawEvent>>,
    failing: HashSet<String>,
    fetches: Mutex<Vec<(String, FetchOptions)>>,
}

impl FakeSource {
    pub(crate) fn with_calendar(mut self, calendar: CalendarInfo) -> Self {
        self.calendars.push(calendar);
        self
    }

    pub(crate) fn with_events(mut self, calendar_id: &str, events: Vec<RawEvent>) -> Self {
        self.events.insert(calendar_id.to_string(), events);
        self
    }

    pub(crate) fn with_failing(mut self, calendar_id: &str) -> Self {
        self.failing.insert(calendar_id.to_string());
        self
    }

    /// Calendar ids and options of every `list_events` call so far.
    pub(crate) fn fetches(&self) -> Vec<(String, FetchOptions)> {
        self.fetches.lock().unwrap().clone()
    }
}

impl CalendarSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        options: FetchOptions,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(async move {
            self.fetches
                .lock()
                .unwrap()
                .push((calendar_id.to_string(), options));
            if self.failing.contains(calendar_id) {
                let body = format!("{calendar_id} unavailable");
                return Err(ProviderError::from_http_status(503, &body));
            }
            Ok(self.events.get(calendar_id).cloned().unwrap_or_default())
        })
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(async move { Ok(self.calendars.clone()) })
    }
}

/// Connector that always returns the same [`FakeSource`].
pub(crate) struct FakeConnector {
    source: Arc<FakeSource>,
    last_token: Mutex<Option<String>>,
}

impl FakeConnector {
    pub(crate) fn new(source: Arc<FakeSource>) -> Self {
        Self {
            source,
            last_token: Mutex::new(None),
        }
    }

    pub(crate) fn last_token(&self) -> Option<String> {
        self.last_token.lock().unwrap().clone()
    }
}

impl SourceConnector for FakeConnector {
    fn connect(&self, access_token: &str) -> ProviderResult<Arc<dyn CalendarSource>> {
        *self.last_token.lock().unwrap() = Some(access_token.to_string());
        Ok(self.source.clone())
    }
}
