//! Server error types.

use std::io;

use calfeed_providers::ProviderError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Missing encryption key or provider credentials.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No signed-in account, or the provider rejected the cached session.
    #[error("Not authenticated: {message}")]
    NotAuthenticated { message: String },

    /// Encrypted data failed authentication or could not be decoded.
    #[error("Integrity error: {message}")]
    Integrity { message: String },

    /// A request field failed validation.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// Unknown or disabled feed.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Every calendar of a feed failed to fetch.
    #[error("Upstream fetch failed: {message}")]
    UpstreamFetch { message: String },

    /// SQLite error.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Identity or calendar provider error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// IO error (database directory, listener).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a not-authenticated error.
    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self::NotAuthenticated {
            message: message.into(),
        }
    }

    /// Creates an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Creates a validation error for `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an upstream fetch error.
    pub fn upstream_fetch(message: impl Into<String>) -> Self {
        Self::UpstreamFetch {
            message: message.into(),
        }
    }

    /// Returns true for [`ServerError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classifies an error coming back from the identity client.
    ///
    /// Rejected credentials become [`ServerError::NotAuthenticated`].
    /// Integrity and configuration failures raised by the session cache
    /// hooks are unwrapped so they keep their kind.
    pub fn from_identity(err: ProviderError) -> Self {
        if err.is_authentication() {
            return Self::not_authenticated(err.message().to_string());
        }
        let inner = std::error::Error::source(&err).and_then(|s| s.downcast_ref::<ServerError>());
        match inner {
            Some(Self::Integrity { message }) => Self::integrity(message.clone()),
            Some(Self::Configuration { message }) => Self::configuration(message.clone()),
            _ => Self::Provider(err),
        }
    }
}
