//! SQLite database setup and schema management
//!
//! All durable state (cursors, processed blobs, the local catalog and stored
//! streams) lives in one SQLite file shared behind an async mutex.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Database schema version
const SCHEMA_VERSION: u32 = 1;

/// Error types for database setup
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Result type for database setup
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Connection handle shared by every store
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open (or create) the database file and bring its schema up to date
pub fn open_database(path: impl AsRef<Path>) -> DatabaseResult<SharedConnection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    initialize_schema(&conn)?;

    info!(path = %path.display(), "Database opened");
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database with the full schema
pub fn open_in_memory() -> DatabaseResult<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    initialize_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Create tables on a fresh database and refuse databases from the future
pub fn initialize_schema(conn: &Connection) -> DatabaseResult<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version = get_schema_version(conn)?;
    if current_version > SCHEMA_VERSION {
        error!(
            "Database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        );
        return Err(DatabaseError::UnsupportedVersion {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    if current_version < SCHEMA_VERSION {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Database schema initialized to version {}", SCHEMA_VERSION);
    }

    Ok(())
}

fn create_tables(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS checkpoints (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processed_blobs (
            blob_id TEXT PRIMARY KEY,
            processed_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            title TEXT NOT NULL,
            year INTEGER,
            end_year INTEGER,
            media_type TEXT NOT NULL,
            adult BOOLEAN NOT NULL DEFAULT FALSE,
            poster TEXT,
            description TEXT,
            genres TEXT NOT NULL DEFAULT '[]',
            imdb_id TEXT,
            tmdb_id TEXT,
            tvdb_id TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS streams (
            info_hash TEXT PRIMARY KEY,
            meta_id TEXT NOT NULL,
            name TEXT NOT NULL,
            size INTEGER NOT NULL,
            source TEXT NOT NULL,
            resolution TEXT,
            codec TEXT,
            quality TEXT,
            bit_depth TEXT,
            release_group TEXT,
            audio_formats TEXT NOT NULL DEFAULT '[]',
            channels TEXT NOT NULL DEFAULT '[]',
            hdr_formats TEXT NOT NULL DEFAULT '[]',
            languages TEXT NOT NULL DEFAULT '[]',
            is_remastered BOOLEAN NOT NULL DEFAULT FALSE,
            is_upscaled BOOLEAN NOT NULL DEFAULT FALSE,
            is_proper BOOLEAN NOT NULL DEFAULT FALSE,
            is_repack BOOLEAN NOT NULL DEFAULT FALSE,
            is_extended BOOLEAN NOT NULL DEFAULT FALSE,
            is_complete BOOLEAN NOT NULL DEFAULT FALSE,
            is_dubbed BOOLEAN NOT NULL DEFAULT FALSE,
            is_subbed BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stream_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            info_hash TEXT NOT NULL,
            file_index INTEGER NOT NULL,
            filename TEXT NOT NULL,
            file_type TEXT NOT NULL,
            season_number INTEGER,
            episode_number INTEGER,
            FOREIGN KEY(info_hash) REFERENCES streams(info_hash) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_media_title_lower ON media(LOWER(title));
        CREATE INDEX IF NOT EXISTS idx_media_type ON media(media_type);
        CREATE INDEX IF NOT EXISTS idx_streams_meta_id ON streams(meta_id);
        CREATE INDEX IF NOT EXISTS idx_stream_files_hash ON stream_files(info_hash);",
    )?;
    Ok(())
}

/// Current schema version, 0 for a fresh database
pub fn get_schema_version(conn: &Connection) -> DatabaseResult<u32> {
    let version = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get::<_, u32>(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: u32) -> DatabaseResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, datetime('now'))",
        params![version],
    )?;
    Ok(())
}
