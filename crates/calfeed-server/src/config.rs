//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Port the daemon listens on by default.
pub const DEFAULT_PORT: u16 = 5600;

/// Base URL used for feed links and the OAuth redirect when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5600";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,

    /// HTTP listen address.
    pub bind: SocketAddr,

    /// How often the refresh scheduler wakes up.
    pub tick_interval: Duration,

    /// Upper bound on one feed's refresh action.
    pub refresh_timeout: Duration,

    /// Timeout for outbound identity and calendar requests.
    pub fetch_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            tick_interval: Duration::from_secs(60),
            refresh_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration using the given database path.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }

    /// Builder: set listen address.
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Builder: set scheduler tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Builder: set per-feed refresh timeout.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Builder: set outbound request timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Returns the default database path.
///
/// Uses `$XDG_DATA_HOME/calfeed/app.db` (or the platform equivalent),
/// falling back to `./calfeed/app.db` when no data directory is known.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("calfeed")
        .join("app.db")
}
