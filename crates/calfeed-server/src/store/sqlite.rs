//! SQLite database: connection management, schema and migrations.
//!
//! Table operations live in `tables/`, each adding an `impl Database` block.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rand::RngCore;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::error::ServerResult;
use crate::models::format_timestamp;

/// Length of the application secret in bytes.
pub const APP_SECRET_LEN: usize = 32;

/// Single-connection database handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens (creating if needed) the database at `path` and brings the
    /// schema up to date.
    pub fn open(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        info!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> ServerResult<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init()?;
        Ok(db)
    }

    /// Locks the connection.
    ///
    /// A panic while the lock was held leaves SQLite itself consistent, so a
    /// poisoned lock is recovered rather than propagated.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init(&self) -> ServerResult<()> {
        let conn = self.conn();

        // The key table comes first so a fresh database has its secret
        // before anything encrypted can be written.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS app_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                encryption_key TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        migrate_legacy_columns(&conn)?;
        ensure_app_secret(&conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                base_url TEXT,
                client_id TEXT,
                client_secret_enc TEXT,
                updated_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_cache (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                cache_data TEXT,
                updated_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                token TEXT UNIQUE NOT NULL,
                calendar_ids_json TEXT NOT NULL,
                include_past_days INTEGER NOT NULL DEFAULT 30,
                include_future_days INTEGER NOT NULL DEFAULT 365,
                refresh_interval_hours INTEGER NOT NULL DEFAULT 6,
                last_refreshed_at TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ui_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                selected_calendar_ids_json TEXT,
                last_view TEXT DEFAULT 'month',
                updated_at TEXT
            )",
            [],
        )?;

        // Columns added after the first release.
        if !has_column(&conn, "feeds", "refresh_interval_hours")? {
            info!("adding refresh_interval_hours column to feeds");
            conn.execute(
                "ALTER TABLE feeds ADD COLUMN refresh_interval_hours INTEGER DEFAULT 6",
                [],
            )?;
        }
        if !has_column(&conn, "feeds", "last_refreshed_at")? {
            info!("adding last_refreshed_at column to feeds");
            conn.execute("ALTER TABLE feeds ADD COLUMN last_refreshed_at TEXT", [])?;
        }
        if !has_column(&conn, "settings", "base_url")? {
            info!("adding base_url column to settings");
            conn.execute("ALTER TABLE settings ADD COLUMN base_url TEXT", [])?;
        }

        conn.execute("INSERT OR IGNORE INTO settings (id) VALUES (1)", [])?;
        conn.execute("INSERT OR IGNORE INTO session_cache (id) VALUES (1)", [])?;
        conn.execute("INSERT OR IGNORE INTO ui_state (id) VALUES (1)", [])?;

        if unmigrated_legacy_session(&conn)? {
            warn!(
                "a sign-in session from an earlier release cannot be reused; \
                 sign in again through /auth/login"
            );
        }

        debug!("schema initialized");
        Ok(())
    }
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|c| c > 0)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name=?2",
        [table, column],
        |row| row.get::<_, i64>(0),
    )
    .map(|c| c > 0)
}

/// Renames the `ms_`-prefixed credential columns of early databases.
fn migrate_legacy_columns(conn: &Connection) -> rusqlite::Result<()> {
    if !table_exists(conn, "settings")? {
        return Ok(());
    }
    for (old, new) in [
        ("ms_client_id", "client_id"),
        ("ms_client_secret_enc", "client_secret_enc"),
    ] {
        if has_column(conn, "settings", old)? && !has_column(conn, "settings", new)? {
            info!(old, new, "renaming settings column");
            conn.execute(
                &format!("ALTER TABLE settings RENAME COLUMN {old} TO {new}"),
                [],
            )?;
        }
    }
    Ok(())
}

fn has_non_empty(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE {column} IS NOT NULL AND {column} != ''"),
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|c| c > 0)
}

/// True when an earlier release left a token cache in `msal_cache` and no
/// session has been stored since. That cache format is not read here.
fn unmigrated_legacy_session(conn: &Connection) -> rusqlite::Result<bool> {
    if !table_exists(conn, "msal_cache")? {
        return Ok(false);
    }
    Ok(has_non_empty(conn, "msal_cache", "cache_data")?
        && !has_non_empty(conn, "session_cache", "cache_data")?)
}

/// Returns true if any encrypted value is already stored.
fn has_encrypted_data(conn: &Connection) -> rusqlite::Result<bool> {
    let mut found = false;
    if has_column(conn, "settings", "client_secret_enc")? {
        found |= has_non_empty(conn, "settings", "client_secret_enc")?;
    }
    if has_column(conn, "session_cache", "cache_data")? {
        found |= has_non_empty(conn, "session_cache", "cache_data")?;
    }
    Ok(found)
}

/// Creates the application secret if the singleton row is missing.
///
/// The insert is `INSERT OR IGNORE` on the fixed id, so an existing key is
/// never replaced.
fn ensure_app_secret(conn: &Connection) -> rusqlite::Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT encryption_key FROM app_config WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(());
    }

    if has_encrypted_data(conn)? {
        warn!(
            "no encryption key found but encrypted values exist; they cannot be decrypted \
             and must be re-entered"
        );
    }

    let mut key = [0u8; APP_SECRET_LEN];
    rand::rng().fill_bytes(&mut key);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO app_config (id, encryption_key, created_at) VALUES (1, ?1, ?2)",
        params![hex::encode(key), format_timestamp(Utc::now())],
    )?;
    if inserted > 0 {
        info!("generated new encryption key");
    }
    Ok(())
}
