//! In-memory `FeedApi` and a ready-made crawl context for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ByteStream, Creator, FeedApi, FeedPage, MediaInfo};
use crate::crawl::breaker::ThresholdConfig;
use crate::crawl::{CrawlConfig, CrawlContext, MEDIA_BATCH_SIZE};
use crate::download::{DownloadConfig, MediaSaver};
use crate::retry::{RateLimitPolicy, RetryConfig};
use crate::state::SqliteStateDb;
use crate::types::DownloadMode;

/// Serves scripted pages, media metadata and files. Every unknown URL or
/// cursor answers 404. Queued errors are returned before any scripted value.
#[derive(Default)]
pub struct FakeApi {
    creators: Mutex<HashMap<String, Creator>>,
    /// Keyed by `(wall id or "", cursor)`.
    pages: Mutex<HashMap<(String, String), FeedPage>>,
    page_errors: Mutex<VecDeque<ApiError>>,
    download_errors: Mutex<VecDeque<ApiError>>,
    media: Mutex<HashMap<String, MediaInfo>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    texts: Mutex<HashMap<String, String>>,
    pub page_calls: AtomicUsize,
    pub media_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

fn not_found(url: &str) -> ApiError {
    ApiError::HttpStatus {
        status: 404,
        url: url.to_string(),
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_creator(&self, creator: Creator) {
        self.creators
            .lock()
            .unwrap()
            .insert(creator.username.clone(), creator);
    }

    pub fn add_timeline_page(&self, cursor: &str, page: FeedPage) {
        self.pages
            .lock()
            .unwrap()
            .insert((String::new(), cursor.to_string()), page);
    }

    pub fn add_wall_page(&self, wall_id: &str, cursor: &str, page: FeedPage) {
        self.pages
            .lock()
            .unwrap()
            .insert((wall_id.to_string(), cursor.to_string()), page);
    }

    pub fn push_page_error(&self, error: ApiError) {
        self.page_errors.lock().unwrap().push_back(error);
    }

    pub fn push_download_error(&self, error: ApiError) {
        self.download_errors.lock().unwrap().push_back(error);
    }

    pub fn add_media(&self, info: MediaInfo) {
        self.media.lock().unwrap().insert(info.id.clone(), info);
    }

    pub fn add_file(&self, url: &str, body: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }

    pub fn add_text(&self, url: &str, body: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn page(&self, wall: &str, cursor: &str) -> Result<FeedPage, ApiError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.page_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.pages
            .lock()
            .unwrap()
            .get(&(wall.to_string(), cursor.to_string()))
            .cloned()
            .ok_or_else(|| not_found(cursor))
    }
}

#[async_trait]
impl FeedApi for FakeApi {
    async fn fetch_creator(&self, username: &str) -> Result<Creator, ApiError> {
        self.creators
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .ok_or_else(|| ApiError::CreatorNotFound(username.to_string()))
    }

    async fn fetch_timeline_page(
        &self,
        _creator_id: &str,
        cursor: &str,
    ) -> Result<FeedPage, ApiError> {
        self.page("", cursor)
    }

    async fn fetch_wall_page(
        &self,
        _creator_id: &str,
        wall_id: &str,
        cursor: &str,
    ) -> Result<FeedPage, ApiError> {
        self.page(wall_id, cursor)
    }

    async fn fetch_media_batch(&self, ids: &[String]) -> Result<Vec<MediaInfo>, ApiError> {
        self.media_calls.fetch_add(1, Ordering::SeqCst);
        let media = self.media.lock().unwrap();
        Ok(ids.iter().filter_map(|id| media.get(id).cloned()).collect())
    }

    async fn download(&self, url: &str) -> Result<ByteStream, ApiError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.download_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        let body = self
            .files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| not_found(url))?;
        // Two chunks so streaming code sees more than one.
        let mid = body.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&body[..mid])),
            Ok(Bytes::copy_from_slice(&body[mid..])),
        ];
        Ok(stream::iter(chunks).boxed())
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ApiError> {
        self.texts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| not_found(url))
    }
}

/// Image media `id` served from `https://cdn.test/<id>.jpg`.
pub fn media_info(id: &str) -> MediaInfo {
    serde_json::from_value(json!({
        "id": id,
        "accountId": "acc",
        "createdAt": 1_700_000_000,
        "media": {
            "id": format!("f-{}", id),
            "mimetype": "image/jpeg",
            "width": 100,
            "height": 100,
            "locations": [{"location": format!("https://cdn.test/{}.jpg", id)}]
        }
    }))
    .unwrap()
}

/// A page with the given post ids and a flat media list.
pub fn page_with_media(post_ids: &[&str], media_ids: &[&str]) -> FeedPage {
    serde_json::from_value(json!({
        "posts": post_ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>(),
        "accountMedia": media_ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>(),
        "accountMediaBundles": []
    }))
    .unwrap()
}

/// Fake API, in-memory state and a temp download directory wired into a
/// [`CrawlContext`] with every pacing delay except the empty-page delay and
/// rate-limit backoff set to zero.
pub struct TestEnv {
    pub api: Arc<FakeApi>,
    pub store: Arc<SqliteStateDb>,
    pub ctx: CrawlContext,
    pub dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        let store = Arc::new(SqliteStateDb::open_in_memory().unwrap());
        let rate_limit = RateLimitPolicy {
            pre_call_delay: Duration::ZERO,
            ..RateLimitPolicy::default()
        };
        let saver = MediaSaver::new(
            api.clone(),
            store.clone(),
            DownloadConfig {
                directory: dir.path().to_path_buf(),
                retry: RetryConfig {
                    max_retries: 0,
                    base_delay_secs: 0,
                    max_delay_secs: 0,
                },
                rate_limit,
                show_downloads: false,
                show_skipped_downloads: false,
            },
        );
        let ctx = CrawlContext {
            api: api.clone(),
            store: store.clone(),
            saver,
            config: CrawlConfig {
                download_mode: DownloadMode::Normal,
                threshold: ThresholdConfig::default(),
                use_pagination_duplication: false,
                duplicate_page_cooldown: Duration::ZERO,
                timeline_retries: 1,
                timeline_delay: Duration::from_secs(60),
                page_delay_min: Duration::ZERO,
                page_delay_max: Duration::ZERO,
                rate_limit,
                media_batch_size: MEDIA_BATCH_SIZE,
                include_previews: false,
                interactive: false,
                show_progress: false,
            },
            cancel: CancellationToken::new(),
        };
        Self {
            api,
            store,
            ctx,
            dir,
        }
    }
}
