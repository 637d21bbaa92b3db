//! Serialized token cache for the Microsoft identity client.
//!
//! The cache is a JSON document with one entry per signed-in account. It is
//! opaque to everything outside this module; the server only ever stores the
//! blob.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Account;
use crate::error::{ProviderError, ProviderResult};

/// Access tokens this close to expiry are refreshed instead of reused.
const EXPIRY_SKEW_SECS: i64 = 300;

/// Tokens held for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub account: Account,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    /// Scopes granted with `access_token`.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CacheEntry {
    /// Returns the access token if it is still usable at `now` for `scopes`.
    ///
    /// Scope names are compared case-insensitively. The OpenID scopes never
    /// show up in a granted scope list, so they are not required.
    pub fn usable_access_token(&self, scopes: &[String], now: DateTime<Utc>) -> Option<&str> {
        let token = self.access_token.as_deref()?;
        let expires_at = self.expires_at?;
        if now + Duration::seconds(EXPIRY_SKEW_SECS) >= expires_at {
            return None;
        }
        let granted = |wanted: &String| {
            is_openid_scope(wanted)
                || self
                    .scopes
                    .iter()
                    .any(|have| have.eq_ignore_ascii_case(wanted))
        };
        scopes.iter().all(granted).then_some(token)
    }
}

fn is_openid_scope(scope: &str) -> bool {
    matches!(
        scope.to_ascii_lowercase().as_str(),
        "openid" | "profile" | "email" | "offline_access"
    )
}

/// The full token cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

impl TokenCache {
    /// Parses a blob produced by [`TokenCache::serialize`]. `None` or an
    /// empty blob yields an empty cache.
    pub fn deserialize(blob: Option<&str>) -> ProviderResult<Self> {
        match blob.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(blob) => serde_json::from_str(blob).map_err(|e| {
                ProviderError::internal(format!("token cache is not valid JSON: {e}"))
                    .with_source(e)
            }),
        }
    }

    /// Serializes the cache to its blob form.
    pub fn serialize(&self) -> ProviderResult<String> {
        serde_json::to_string(self)
            .map_err(|e| ProviderError::internal(format!("failed to serialize token cache: {e}")))
    }

    /// Accounts in insertion order.
    pub fn accounts(&self) -> Vec<Account> {
        self.entries.iter().map(|e| e.account.clone()).collect()
    }

    pub fn entry(&self, home_account_id: &str) -> Option<&CacheEntry> {
        self.entries
            .iter()
            .find(|e| e.account.home_account_id == home_account_id)
    }

    /// Inserts or replaces the entry for `entry.account`.
    ///
    /// A replacement without a refresh token keeps the previous one, since
    /// refresh responses do not always rotate it.
    pub fn upsert(&mut self, mut entry: CacheEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.account.home_account_id == entry.account.home_account_id)
        {
            Some(existing) => {
                if entry.refresh_token.is_none() {
                    entry.refresh_token = existing.refresh_token.take();
                }
                *existing = entry;
            }
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, home_account_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.account.home_account_id != home_account_id);
        self.entries.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
