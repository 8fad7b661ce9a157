//! Types for the state tracking module.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Durable record of one media item, keyed by media id.
///
/// `is_downloaded` only flips to true once a file with `content_hash` has
/// been verified at `local_filename`; it is never reset.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    pub id: String,
    pub account_id: String,
    pub mimetype: Option<String>,
    pub content_hash: Option<String>,
    pub local_filename: Option<PathBuf>,
    pub created_at: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub is_downloaded: bool,
}

impl MediaRecord {
    pub fn new(id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            mimetype: None,
            content_hash: None,
            local_filename: None,
            created_at: None,
            downloaded_at: None,
            is_downloaded: false,
        }
    }

    /// Record a verified file for this item.
    pub fn mark_downloaded(&mut self, content_hash: String, local_filename: PathBuf) {
        self.content_hash = Some(content_hash);
        self.local_filename = Some(local_filename);
        self.is_downloaded = true;
        if self.downloaded_at.is_none() {
            self.downloaded_at = Some(Utc::now());
        }
    }
}

/// Result of trying to take the download of one media item.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaClaim {
    /// This caller owns the download until it saves or releases the record.
    Acquired(MediaRecord),
    /// Nothing left to fetch.
    Downloaded(MediaRecord),
    /// Another feed is fetching it right now.
    Held { owner: String },
}

/// A feed post seen during a crawl. Only its existence matters.
#[derive(Debug, Clone)]
pub struct PostRecord {
    pub id: String,
    pub account_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Counters written to `sync_runs` when a feed invocation ends.
#[derive(Debug, Clone, Default)]
pub struct SyncRunStats {
    pub downloaded: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub outcome: String,
}

/// One row of the `sync_runs` table.
#[derive(Debug, Clone)]
pub struct SyncRunRow {
    pub creator: String,
    pub feed_kind: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub downloaded: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub outcome: Option<String>,
}

/// Summary of the current state database.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total_media: u64,
    pub downloaded_media: u64,
    pub total_posts: u64,
    pub recent_runs: Vec<SyncRunRow>,
}
