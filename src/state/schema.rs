//! Database schema definitions and migrations.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 2;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS media (
    id TEXT PRIMARY KEY NOT NULL,
    account_id TEXT NOT NULL,
    mimetype TEXT,
    created_at INTEGER,
    content_hash TEXT,
    local_filename TEXT,
    is_downloaded INTEGER NOT NULL DEFAULT 0,
    downloaded_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_media_content_hash ON media(content_hash);
CREATE INDEX IF NOT EXISTS idx_media_account ON media(account_id);

CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY NOT NULL,
    account_id TEXT,
    created_at INTEGER,
    first_seen_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS walls (
    id TEXT PRIMARY KEY NOT NULL,
    account_id TEXT NOT NULL,
    name TEXT
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    creator TEXT NOT NULL,
    feed_kind TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    downloaded INTEGER DEFAULT 0,
    duplicates INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    outcome TEXT
);
"#;

/// Owner of an in-flight download, so two feeds never fetch one item at once.
const SCHEMA_V2: &str = "ALTER TABLE media ADD COLUMN claimed_by TEXT;";

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema. Idempotent.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        set_schema_version(conn, 1)?;
        tracing::debug!("Initialized database schema at version 1");
    }
    if current_version < 2 {
        conn.execute_batch(SCHEMA_V2)?;
        set_schema_version(conn, 2)?;
        tracing::debug!("Migrated database schema to version 2");
    }

    Ok(())
}
