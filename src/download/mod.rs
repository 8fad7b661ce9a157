//! Content-addressed media saving.
//!
//! [`MediaSaver::save_media`] decides per item whether any network or disk
//! work is needed, cheapest check first:
//!
//! 1. the state DB already has the item as downloaded, or another feed holds
//!    its download claim;
//! 2. a file at the target path hashes to the stored content hash;
//! 3. a file exists but its hash is unknown or stale: download to a `.part`
//!    file and compare before trusting either copy;
//! 4. otherwise download (or join a chunked video) and rename into place.
//!
//! Every path that ends without new bytes on disk counts as a duplicate on
//! the run's counters, which is what feeds the circuit breaker.

pub mod error;
pub mod file;
pub mod hls;
pub mod paths;

pub use error::{DownloadError, SaveError};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::FeedApi;
use crate::crawl::media::{CandidateMediaItem, MediaCategory};
use crate::crawl::run_state::RunState;
use crate::retry::{RateLimitPolicy, RetryConfig};
use crate::state::{MediaClaim, MediaRecord, StateDb};

/// Subset of application config relevant to saving media.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub directory: PathBuf,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitPolicy,
    pub show_downloads: bool,
    pub show_skipped_downloads: bool,
}

pub struct MediaSaver {
    api: Arc<dyn FeedApi>,
    store: Arc<dyn StateDb>,
    config: DownloadConfig,
}

impl MediaSaver {
    pub fn new(api: Arc<dyn FeedApi>, store: Arc<dyn StateDb>, config: DownloadConfig) -> Self {
        Self { api, store, config }
    }

    pub fn target_path(&self, creator: &str, category: MediaCategory, item: &CandidateMediaItem) -> PathBuf {
        paths::local_download_path(&self.config.directory, creator, category, &item.filename)
    }

    /// Save one item. `Ok(None)` means nothing new was written.
    pub async fn save_media(
        &self,
        item: &CandidateMediaItem,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaRecord>, SaveError> {
        let Some(url) = item.download_url.as_deref() else {
            return Err(invalid(item, "no download url"));
        };
        let Some(category) = item.category() else {
            return Err(invalid(item, "missing or unsupported mimetype"));
        };

        let owner = format!("{}/{}", run.creator, run.feed_kind);
        let record = match self.store.claim_media(&item.to_record(), &owner).await? {
            MediaClaim::Acquired(record) => record,
            MediaClaim::Downloaded(_) => {
                self.skipped(item, run, "already in database");
                return Ok(None);
            }
            MediaClaim::Held { owner } => {
                tracing::debug!(
                    media_id = %item.media_id,
                    holder = %owner,
                    "Download in progress elsewhere"
                );
                self.skipped(item, run, "claimed by another feed");
                return Ok(None);
            }
        };

        let result = self
            .save_claimed(item, url, category, record, run, cancel)
            .await;
        if result.is_err() {
            if let Err(e) = self.store.release_media(&item.media_id).await {
                tracing::warn!(media_id = %item.media_id, "Could not release claim: {}", e);
            }
        }
        result
    }

    /// Body of [`MediaSaver::save_media`] once this run owns the item. Every
    /// successful path persists the record, which also drops the claim.
    async fn save_claimed(
        &self,
        item: &CandidateMediaItem,
        url: &str,
        category: MediaCategory,
        mut record: MediaRecord,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaRecord>, SaveError> {
        let target = self.target_path(&run.creator, category, item);
        let chunked = item.is_chunked();
        let on_disk = if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            Some(
                file::hash_file(&target)
                    .await
                    .map_err(|e| self.transfer_error(item, chunked, e.into()))?,
            )
        } else {
            None
        };

        if let (Some(disk_hash), Some(stored)) = (&on_disk, &record.content_hash) {
            if disk_hash == stored {
                record.mark_downloaded(disk_hash.clone(), target);
                self.store.save_media(&record).await?;
                self.skipped(item, run, "file on disk matches stored hash");
                return Ok(None);
            }
        }

        let part = file::part_path(&target);
        let hash = if chunked {
            hls::download_hls(
                self.api.as_ref(),
                url,
                &part,
                &self.config.rate_limit,
                &self.config.retry,
                cancel,
            )
            .await
        } else {
            file::download_file(
                self.api.as_ref(),
                url,
                &part,
                &self.config.rate_limit,
                &self.config.retry,
                cancel,
            )
            .await
        }
        .map_err(|e| self.transfer_error(item, chunked, e))?;

        if !chunked && on_disk.as_deref() == Some(hash.as_str()) {
            file::discard_part(&part).await;
            record.mark_downloaded(hash, target);
            self.store.save_media(&record).await?;
            self.skipped(item, run, "downloaded copy matches file on disk");
            return Ok(None);
        }

        if chunked {
            if let Some(canonical) = self
                .store
                .find_downloaded_by_hash(&hash, &record.id)
                .await?
            {
                file::discard_part(&part).await;
                let path = canonical.local_filename.unwrap_or(target);
                record.mark_downloaded(hash, path);
                self.store.save_media(&record).await?;
                self.skipped(item, run, "joined video matches another item");
                return Ok(None);
            }
        }

        if let Err(e) = file::promote(&part, &target).await {
            file::discard_part(&part).await;
            return Err(self.transfer_error(item, chunked, e.into()));
        }
        file::stamp_mtime(&target, item.created_at.timestamp()).await;

        record.mark_downloaded(hash, target);
        self.store.save_media(&record).await?;
        run.record_download(category);
        self.downloaded(item, &record);
        Ok(Some(record))
    }

    fn transfer_error(&self, item: &CandidateMediaItem, chunked: bool, e: DownloadError) -> SaveError {
        match e {
            DownloadError::Cancelled => SaveError::Cancelled,
            source if chunked => SaveError::ChunkedVideo {
                id: item.media_id.clone(),
                source,
            },
            source => SaveError::Download {
                id: item.media_id.clone(),
                source,
            },
        }
    }

    fn skipped(&self, item: &CandidateMediaItem, run: &mut RunState, reason: &str) {
        run.record_duplicate();
        if self.config.show_skipped_downloads {
            tracing::info!(media_id = %item.media_id, reason, "Skipped {}", item.filename);
        } else {
            tracing::debug!(media_id = %item.media_id, reason, "Skipped {}", item.filename);
        }
    }

    fn downloaded(&self, item: &CandidateMediaItem, record: &MediaRecord) {
        let path = record
            .local_filename
            .as_deref()
            .map(Path::display)
            .map(|d| d.to_string())
            .unwrap_or_default();
        if self.config.show_downloads {
            tracing::info!(media_id = %item.media_id, "Downloaded {}", path);
        } else {
            tracing::debug!(media_id = %item.media_id, "Downloaded {}", path);
        }
    }
}

fn invalid(item: &CandidateMediaItem, reason: &'static str) -> SaveError {
    SaveError::InvalidItem {
        id: item.media_id.clone(),
        reason,
    }
}
