use std::collections::HashSet;

use crate::crawl::media::MediaCategory;
use crate::state::SyncRunStats;
use crate::types::FeedKind;

/// Mutable counters for one feed invocation.
///
/// Constructed by the sync driver for each feed and passed by `&mut` through
/// the paginator, orchestrator and dedup engine. Never shared between feeds.
#[derive(Debug)]
pub struct RunState {
    pub creator: String,
    pub feed_kind: FeedKind,
    /// Duplicates seen since the feed started.
    pub duplicate_count: u64,
    /// Duplicates seen on the current page.
    pub batch_duplicate_count: u64,
    pub pictures_downloaded: u64,
    pub videos_downloaded: u64,
    pub audio_downloaded: u64,
    pub failed: u64,
    pub pages: u64,
    seen_images: HashSet<String>,
    seen_videos: HashSet<String>,
    seen_audio: HashSet<String>,
}

impl RunState {
    pub fn new(creator: impl Into<String>, feed_kind: FeedKind) -> Self {
        Self {
            creator: creator.into(),
            feed_kind,
            duplicate_count: 0,
            batch_duplicate_count: 0,
            pictures_downloaded: 0,
            videos_downloaded: 0,
            audio_downloaded: 0,
            failed: 0,
            pages: 0,
            seen_images: HashSet::new(),
            seen_videos: HashSet::new(),
            seen_audio: HashSet::new(),
        }
    }

    /// Reset the per-page counter at a page boundary.
    pub fn begin_batch(&mut self) {
        self.batch_duplicate_count = 0;
        self.pages += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicate_count += 1;
        self.batch_duplicate_count += 1;
    }

    pub fn record_download(&mut self, category: MediaCategory) {
        match category {
            MediaCategory::Image => self.pictures_downloaded += 1,
            MediaCategory::Video => self.videos_downloaded += 1,
            MediaCategory::Audio => self.audio_downloaded += 1,
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    fn seen_set(&mut self, category: MediaCategory) -> &mut HashSet<String> {
        match category {
            MediaCategory::Image => &mut self.seen_images,
            MediaCategory::Video => &mut self.seen_videos,
            MediaCategory::Audio => &mut self.seen_audio,
        }
    }

    /// Whether this media id was already handled earlier in this run.
    pub fn is_seen(&self, category: MediaCategory, media_id: &str) -> bool {
        match category {
            MediaCategory::Image => self.seen_images.contains(media_id),
            MediaCategory::Video => self.seen_videos.contains(media_id),
            MediaCategory::Audio => self.seen_audio.contains(media_id),
        }
    }

    pub fn mark_seen(&mut self, category: MediaCategory, media_id: &str) {
        self.seen_set(category).insert(media_id.to_string());
    }

    pub fn downloaded_total(&self) -> u64 {
        self.pictures_downloaded + self.videos_downloaded + self.audio_downloaded
    }

    pub fn to_stats(&self, outcome: impl Into<String>) -> SyncRunStats {
        SyncRunStats {
            downloaded: self.downloaded_total(),
            duplicates: self.duplicate_count,
            failed: self.failed,
            outcome: outcome.into(),
        }
    }
}
