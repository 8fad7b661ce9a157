//! State database trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{MediaClaim, MediaRecord, PostRecord, SyncRunRow, SyncRunStats, SyncSummary};

/// Storage collaborator for the crawl pipeline.
///
/// Every method is one short transaction; callers never hold one open across
/// network I/O. Object-safe so it can be shared as `Arc<dyn StateDb>`.
#[async_trait]
pub trait StateDb: Send + Sync {
    /// Whether a post with this id has been recorded before.
    async fn post_exists(&self, id: &str) -> Result<bool, StateError>;

    /// Record posts of a fully processed page. Existing posts are left alone.
    async fn record_posts(&self, posts: &[PostRecord]) -> Result<(), StateError>;

    /// Insert or rename the walls of a creator.
    async fn upsert_walls(
        &self,
        account_id: &str,
        walls: &[(String, Option<String>)],
    ) -> Result<(), StateError>;

    /// Display name of a wall, if one is known.
    async fn wall_name(&self, wall_id: &str) -> Result<Option<String>, StateError>;

    /// Locate the media record for `record.id`, creating it from `record` if
    /// absent. The media primary key makes this the serialization point for
    /// concurrent feeds that meet the same media id.
    async fn get_or_create_media(&self, record: &MediaRecord) -> Result<MediaRecord, StateError>;

    /// Upsert like [`StateDb::get_or_create_media`] and, in the same
    /// transaction, take the item for `owner` unless it is already
    /// downloaded or held by someone else.
    async fn claim_media(&self, record: &MediaRecord, owner: &str)
        -> Result<MediaClaim, StateError>;

    /// Give up a claim without marking the item downloaded.
    async fn release_media(&self, id: &str) -> Result<(), StateError>;

    /// Persist hash, path and download flag, releasing any claim. A
    /// downloaded record never reverts to not-downloaded.
    async fn save_media(&self, record: &MediaRecord) -> Result<(), StateError>;

    /// A downloaded record other than `exclude_id` carrying `content_hash`.
    async fn find_downloaded_by_hash(
        &self,
        content_hash: &str,
        exclude_id: &str,
    ) -> Result<Option<MediaRecord>, StateError>;

    /// Every downloaded record, ordered by id.
    async fn downloaded_media(&self) -> Result<Vec<MediaRecord>, StateError>;

    async fn start_sync_run(&self, creator: &str, feed_kind: &str) -> Result<i64, StateError>;

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats)
        -> Result<(), StateError>;

    async fn get_summary(&self, recent_runs: usize) -> Result<SyncSummary, StateError>;
}

/// SQLite implementation of the state database.
pub struct SqliteStateDb {
    /// rusqlite::Connection is not Sync; the lock is never held across an await.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

const MEDIA_COLUMNS: &str =
    "id, account_id, mimetype, created_at, content_hash, local_filename, is_downloaded, downloaded_at";

impl SqliteStateDb {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL lets concurrent feeds read while one of them writes.
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;
            conn.busy_timeout(std::time::Duration::from_secs(10))
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;
            // Claims only live as long as the process that took them.
            let stale = conn
                .execute("UPDATE media SET claimed_by = NULL WHERE claimed_by IS NOT NULL", [])
                .map_err(StateError::query)?;
            if stale > 0 {
                tracing::debug!("Released {} stale download claims", stale);
            }

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

#[async_trait]
impl StateDb for SqliteStateDb {
    async fn post_exists(&self, id: &str) -> Result<bool, StateError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .prepare_cached("SELECT 1 FROM posts WHERE id = ?1")
            .map_err(StateError::query)?
            .query_row([id], |row| row.get(0))
            .optional()
            .map_err(StateError::query)?;
        Ok(found.is_some())
    }

    async fn record_posts(&self, posts: &[PostRecord]) -> Result<(), StateError> {
        if posts.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO posts (id, account_id, created_at, first_seen_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO NOTHING",
                )
                .map_err(StateError::query)?;
            for post in posts {
                stmt.execute(rusqlite::params![
                    post.id,
                    post.account_id,
                    post.created_at.map(|dt| dt.timestamp()),
                    now,
                ])
                .map_err(StateError::query)?;
            }
        }
        tx.commit().map_err(StateError::query)
    }

    async fn upsert_walls(
        &self,
        account_id: &str,
        walls: &[(String, Option<String>)],
    ) -> Result<(), StateError> {
        if walls.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO walls (id, account_id, name) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET name = COALESCE(excluded.name, walls.name)",
                )
                .map_err(StateError::query)?;
            for (id, name) in walls {
                stmt.execute(rusqlite::params![id, account_id, name])
                    .map_err(StateError::query)?;
            }
        }
        tx.commit().map_err(StateError::query)
    }

    async fn wall_name(&self, wall_id: &str) -> Result<Option<String>, StateError> {
        let conn = self.lock()?;
        let name: Option<Option<String>> = conn
            .query_row("SELECT name FROM walls WHERE id = ?1", [wall_id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StateError::query)?;
        Ok(name.flatten())
    }

    async fn get_or_create_media(&self, record: &MediaRecord) -> Result<MediaRecord, StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        let stored = upsert_media(&tx, record)?;
        tx.commit().map_err(StateError::query)?;
        Ok(stored)
    }

    async fn claim_media(
        &self,
        record: &MediaRecord,
        owner: &str,
    ) -> Result<MediaClaim, StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        let stored = upsert_media(&tx, record)?;
        let claim = if stored.is_downloaded {
            MediaClaim::Downloaded(stored)
        } else {
            let taken = tx
                .execute(
                    "UPDATE media SET claimed_by = ?2
                     WHERE id = ?1 AND is_downloaded = 0 AND claimed_by IS NULL",
                    rusqlite::params![record.id, owner],
                )
                .map_err(StateError::query)?;
            if taken == 1 {
                MediaClaim::Acquired(stored)
            } else {
                let holder: Option<String> = tx
                    .query_row(
                        "SELECT claimed_by FROM media WHERE id = ?1",
                        [&record.id],
                        |row| row.get(0),
                    )
                    .map_err(StateError::query)?;
                MediaClaim::Held {
                    owner: holder.unwrap_or_default(),
                }
            }
        };
        tx.commit().map_err(StateError::query)?;
        Ok(claim)
    }

    async fn release_media(&self, id: &str) -> Result<(), StateError> {
        let conn = self.lock()?;
        conn.execute("UPDATE media SET claimed_by = NULL WHERE id = ?1", [id])
            .map_err(StateError::query)?;
        Ok(())
    }

    async fn save_media(&self, record: &MediaRecord) -> Result<(), StateError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE media SET
                 content_hash = ?1,
                 local_filename = ?2,
                 is_downloaded = MAX(is_downloaded, ?3),
                 downloaded_at = COALESCE(downloaded_at, ?4),
                 claimed_by = NULL
             WHERE id = ?5",
            rusqlite::params![
                record.content_hash,
                record
                    .local_filename
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                record.is_downloaded as i64,
                record.downloaded_at.map(|dt| dt.timestamp()),
                record.id,
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn find_downloaded_by_hash(
        &self,
        content_hash: &str,
        exclude_id: &str,
    ) -> Result<Option<MediaRecord>, StateError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM media
                 WHERE content_hash = ?1 AND id != ?2 AND is_downloaded = 1
                 LIMIT 1",
                MEDIA_COLUMNS
            ),
            [content_hash, exclude_id],
            row_to_media_record,
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn downloaded_media(&self) -> Result<Vec<MediaRecord>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM media WHERE is_downloaded = 1 ORDER BY id",
                MEDIA_COLUMNS
            ))
            .map_err(StateError::query)?;
        let rows = stmt
            .query_map([], row_to_media_record)
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;
        Ok(rows)
    }

    async fn start_sync_run(&self, creator: &str, feed_kind: &str) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (creator, feed_kind, started_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![creator, feed_kind, started_at],
        )
        .map_err(StateError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, downloaded = ?2, duplicates = ?3, failed = ?4, outcome = ?5 WHERE id = ?6",
            rusqlite::params![
                completed_at,
                stats.downloaded as i64,
                stats.duplicates as i64,
                stats.failed as i64,
                stats.outcome,
                run_id
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn get_summary(&self, recent_runs: usize) -> Result<SyncSummary, StateError> {
        let conn = self.lock()?;

        let count = |sql: &str| -> Result<u64, StateError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(StateError::query)
        };
        let total_media = count("SELECT COUNT(*) FROM media")?;
        let downloaded_media = count("SELECT COUNT(*) FROM media WHERE is_downloaded = 1")?;
        let total_posts = count("SELECT COUNT(*) FROM posts")?;

        let mut stmt = conn
            .prepare(
                "SELECT creator, feed_kind, started_at, completed_at, downloaded, duplicates, failed, outcome
                 FROM sync_runs ORDER BY id DESC LIMIT ?1",
            )
            .map_err(StateError::query)?;
        let runs = stmt
            .query_map([recent_runs as i64], |row| {
                Ok(SyncRunRow {
                    creator: row.get(0)?,
                    feed_kind: row.get(1)?,
                    started_at: timestamp(row.get(2)?),
                    completed_at: timestamp(row.get(3)?),
                    downloaded: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
                    duplicates: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u64,
                    failed: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u64,
                    outcome: row.get(7)?,
                })
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        Ok(SyncSummary {
            total_media,
            downloaded_media,
            total_posts,
            recent_runs: runs,
        })
    }
}

/// Insert `record` unless present, filling gaps in an existing row, and
/// return the stored row.
fn upsert_media(
    tx: &rusqlite::Transaction<'_>,
    record: &MediaRecord,
) -> Result<MediaRecord, StateError> {
    tx.execute(
        "INSERT INTO media (id, account_id, mimetype, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             mimetype = COALESCE(media.mimetype, excluded.mimetype),
             created_at = COALESCE(media.created_at, excluded.created_at)",
        rusqlite::params![
            record.id,
            record.account_id,
            record.mimetype,
            record.created_at.map(|dt| dt.timestamp()),
        ],
    )
    .map_err(StateError::query)?;
    tx.query_row(
        &format!("SELECT {} FROM media WHERE id = ?1", MEDIA_COLUMNS),
        [&record.id],
        row_to_media_record,
    )
    .map_err(StateError::query)
}

fn timestamp(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

fn row_to_media_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaRecord> {
    let local_filename: Option<String> = row.get(5)?;
    Ok(MediaRecord {
        id: row.get(0)?,
        account_id: row.get(1)?,
        mimetype: row.get(2)?,
        created_at: timestamp(row.get(3)?),
        content_hash: row.get(4)?,
        local_filename: local_filename.map(PathBuf::from),
        is_downloaded: row.get::<_, i64>(6)? != 0,
        downloaded_at: timestamp(row.get(7)?),
    })
}
