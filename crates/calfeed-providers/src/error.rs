//! Error type shared by the identity client and calendar sources.

use std::fmt;
use thiserror::Error;

/// What went wrong, coarse enough for callers to branch on.
///
/// The session layer turns [`ProviderErrorKind::Authentication`] into
/// "not signed in"; the publisher treats every other kind as a failed
/// calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// Credentials, refresh token or authorization code were rejected.
    Authentication,
    /// Connection failure, DNS error or timeout.
    Network,
    /// Any other unsuccessful HTTP status.
    Upstream { status: u16 },
    /// Body could not be decoded.
    InvalidResponse,
    /// Client id, secret or authority missing or malformed.
    Configuration,
    /// Local failure, e.g. while persisting the token cache.
    Internal,
}

impl ProviderErrorKind {
    /// Maps an unsuccessful HTTP status. The identity endpoint answers
    /// `400 invalid_grant` for revoked refresh tokens, so 400 counts as a
    /// rejected credential.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 401 => Self::Authentication,
            _ => Self::Upstream { status },
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => f.write_str("authentication failed"),
            Self::Network => f.write_str("network error"),
            Self::Upstream { status } => write!(f, "upstream returned {status}"),
            Self::InvalidResponse => f.write_str("invalid response"),
            Self::Configuration => f.write_str("configuration error"),
            Self::Internal => f.write_str("internal error"),
        }
    }
}

/// An error raised by the identity client or a calendar source.
#[derive(Debug, Error)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
    /// Backend that produced the error, e.g. "graph".
    provider: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            source: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Authentication, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidResponse, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Configuration, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Internal, message)
    }

    /// Builds an error from an unsuccessful HTTP response, keeping at most
    /// 512 characters of the body.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        const MAX_BODY: usize = 512;
        let body = match body.char_indices().nth(MAX_BODY) {
            Some((idx, _)) => &body[..idx],
            None => body,
        };
        Self::new(
            ProviderErrorKind::from_http_status(status),
            format!("HTTP {status}: {body}"),
        )
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True if the upstream rejected the credentials.
    pub fn is_authentication(&self) -> bool {
        self.kind == ProviderErrorKind::Authentication
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "{provider}: ")?;
        }
        write!(f, "{} ({})", self.message, self.kind)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
