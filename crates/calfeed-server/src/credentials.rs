//! Settings and session cache, encrypted at rest.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use calfeed_providers::{ProviderError, ProviderResult, TokenCachePersistence};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cipher::SecretCipher;
use crate::config::DEFAULT_BASE_URL;
use crate::error::{ServerError, ServerResult};
use crate::models::Settings;
use crate::store::Database;

/// A partial settings update. Empty or missing values leave the stored value
/// unchanged; there is no way to clear a field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default, alias = "base_url")]
    pub base_url: Option<String>,
    #[serde(default, alias = "ms_client_id")]
    pub client_id: Option<String>,
    #[serde(default, alias = "ms_client_secret")]
    pub client_secret: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Owner of the application secret, settings and session cache.
#[derive(Debug)]
pub struct CredentialStore {
    db: Arc<Database>,
    /// Bumped on every effective settings change.
    generation: AtomicU64,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            generation: AtomicU64::new(0),
        }
    }

    /// Current settings generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns a cipher for the application secret.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error if no key is stored.
    pub fn cipher(&self) -> ServerResult<SecretCipher> {
        match self.db.app_secret()? {
            Some(key) => Ok(SecretCipher::new(&key)),
            None => Err(ServerError::configuration("encryption key not found")),
        }
    }

    pub fn get_settings(&self) -> ServerResult<Settings> {
        self.db.get_settings()
    }

    /// Configured base URL, or the local default.
    pub fn base_url(&self) -> ServerResult<String> {
        Ok(self
            .get_settings()?
            .base_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()))
    }

    /// OAuth redirect URI derived from the base URL.
    pub fn redirect_uri(&self) -> ServerResult<String> {
        Ok(format!("{}/auth/callback", self.base_url()?))
    }

    /// Decrypted client secret, `None` if never configured.
    pub fn client_secret(&self) -> ServerResult<Option<String>> {
        match self.get_settings()?.client_secret_enc {
            Some(enc) if !enc.is_empty() => self.cipher()?.decrypt(&enc),
            _ => Ok(None),
        }
    }

    /// Merges `update` into the stored settings.
    ///
    /// Returns true if any stored value changed; only then is the settings
    /// generation bumped.
    pub fn update_settings(&self, update: SettingsUpdate) -> ServerResult<bool> {
        let current = self.get_settings()?;

        let base_url = match non_empty(update.base_url.as_ref()) {
            Some(url) => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ServerError::validation(
                        "baseUrl",
                        "must start with http:// or https://",
                    ));
                }
                Some(url.trim_end_matches('/'))
            }
            None => None,
        }
        .filter(|url| current.base_url.as_deref() != Some(*url));

        let client_id = non_empty(update.client_id.as_ref())
            .filter(|id| current.client_id.as_deref() != Some(*id));

        let client_secret_enc = match non_empty(update.client_secret.as_ref()) {
            Some(secret) => {
                let stored = match self.client_secret() {
                    Ok(stored) => stored,
                    Err(e @ ServerError::Integrity { .. }) => {
                        warn!(
                            error = %e,
                            "stored client secret failed its integrity check, replacing it"
                        );
                        None
                    }
                    Err(e) => return Err(e),
                };
                if stored.as_deref() == Some(secret) {
                    None
                } else {
                    self.cipher()?.encrypt(secret)?
                }
            }
            None => None,
        };

        if base_url.is_none() && client_id.is_none() && client_secret_enc.is_none() {
            debug!("settings update changed nothing");
            return Ok(false);
        }

        self.db
            .update_settings_columns(base_url, client_id, client_secret_enc.as_deref())?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            generation,
            base_url = base_url.is_some(),
            client_id = client_id.is_some(),
            client_secret = client_secret_enc.is_some(),
            "settings updated"
        );
        Ok(true)
    }

    /// Decrypted session cache blob.
    pub fn get_session_cache_blob(&self) -> ServerResult<Option<String>> {
        match self.db.get_session_cache()? {
            Some(enc) => self.cipher()?.decrypt(&enc),
            None => Ok(None),
        }
    }

    /// Encrypts and stores the session cache blob, replacing the old one.
    pub fn put_session_cache_blob(&self, blob: &str) -> ServerResult<()> {
        let enc = self.cipher()?.encrypt(blob)?;
        self.db.put_session_cache(enc.as_deref())
    }

    /// Forgets every cached account.
    pub fn clear_session_cache(&self) -> ServerResult<()> {
        self.db.put_session_cache(None)
    }
}

fn to_provider_error(err: ServerError) -> ProviderError {
    ProviderError::internal(format!("session cache: {err}")).with_source(err)
}

impl TokenCachePersistence for CredentialStore {
    fn load(&self) -> ProviderResult<Option<String>> {
        self.get_session_cache_blob().map_err(to_provider_error)
    }

    fn save(&self, blob: &str, changed: bool) -> ProviderResult<()> {
        if !changed {
            return Ok(());
        }
        self.put_session_cache_blob(blob).map_err(to_provider_error)
    }
}
