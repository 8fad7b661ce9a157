//! Feed crawling: pagination, page screening, batching and the duplicate
//! circuit breaker, driven per creator by [`sync_creator`].

pub mod batch;
pub mod breaker;
pub mod error;
pub mod extract;
pub mod guard;
pub mod media;
pub mod paginator;
pub mod run_state;

pub use error::FeedError;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::FeedApi;
use crate::download::MediaSaver;
pub(crate) use crate::retry::pause;
use crate::retry::{self, RateLimitPolicy};
use crate::state::StateDb;
use crate::types::DownloadMode;
use breaker::ThresholdConfig;
use paginator::{FeedEnd, FeedTarget};
use run_state::RunState;

/// Media ids requested per metadata call.
pub const MEDIA_BATCH_SIZE: usize = 150;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub download_mode: DownloadMode,
    pub threshold: ThresholdConfig,
    pub use_pagination_duplication: bool,
    pub duplicate_page_cooldown: Duration,
    /// Extra attempts at one cursor after an empty or failed page.
    pub timeline_retries: u32,
    pub timeline_delay: Duration,
    pub page_delay_min: Duration,
    pub page_delay_max: Duration,
    pub rate_limit: RateLimitPolicy,
    pub media_batch_size: usize,
    pub include_previews: bool,
    pub interactive: bool,
    pub show_progress: bool,
}

/// Everything a feed walk needs. Shared by reference across creators.
pub struct CrawlContext {
    pub api: Arc<dyn FeedApi>,
    pub store: Arc<dyn StateDb>,
    pub saver: MediaSaver,
    pub config: CrawlConfig,
    pub cancel: CancellationToken,
}

/// Totals across every feed of one creator.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CreatorSummary {
    pub feeds: usize,
    pub downloaded: u64,
    pub duplicates: u64,
    pub failed: u64,
}

impl CreatorSummary {
    fn add(&mut self, run: &RunState) {
        self.feeds += 1;
        self.downloaded += run.downloaded_total();
        self.duplicates += run.duplicate_count;
        self.failed += run.failed;
    }

    pub fn merge(&mut self, other: &CreatorSummary) {
        self.feeds += other.feeds;
        self.downloaded += other.downloaded;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
    }
}

/// In interactive mode, wait for Enter before carrying on after an error.
pub(crate) async fn acknowledge(interactive: bool) {
    if !interactive {
        return;
    }
    eprintln!("Press Enter to continue...");
    let _ = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)
    })
    .await;
}

fn log_end(username: &str, target: &FeedTarget, end: &FeedEnd, run: &RunState) {
    let kind = target.kind();
    match end {
        FeedEnd::Exhausted => tracing::info!(
            creator = username,
            kind = %kind,
            "Reached the end of the feed"
        ),
        FeedEnd::DuplicatePage(dup) => tracing::info!(creator = username, "{}, stopping", dup),
        FeedEnd::DuplicateThreshold(tripped) => tracing::info!(
            creator = username,
            kind = %kind,
            "{}: the rest of the feed looks synced, stopping",
            tripped
        ),
        FeedEnd::Cancelled => tracing::info!(creator = username, kind = %kind, "Stopped by shutdown"),
    }
    tracing::info!(
        creator = username,
        kind = %kind,
        pages = run.pages,
        pictures = run.pictures_downloaded,
        videos = run.videos_downloaded,
        audio = run.audio_downloaded,
        duplicates = run.duplicate_count,
        failed = run.failed,
        "Feed finished"
    );
}

/// Walk every configured feed of one creator.
///
/// Each feed gets its own [`RunState`] and a `sync_runs` row. A feed that
/// fails with an ordinary error is logged and the next feed runs; errors for
/// which [`FeedError::stops_process`] holds, and state DB failures, are
/// returned.
pub async fn sync_creator(ctx: &CrawlContext, username: &str) -> Result<CreatorSummary, FeedError> {
    let creator = match retry::call_rate_limited(&ctx.config.rate_limit, &ctx.cancel, || {
        ctx.api.fetch_creator(username)
    })
    .await
    {
        Ok(creator) => creator,
        Err(e) if e.is_cancelled() => return Ok(CreatorSummary::default()),
        Err(e) => return Err(e.into()),
    };

    let walls: Vec<(String, Option<String>)> = creator
        .walls
        .iter()
        .map(|w| (w.id.clone(), w.name.clone()))
        .collect();
    ctx.store.upsert_walls(&creator.id, &walls).await?;

    let mut targets = Vec::new();
    if ctx.config.download_mode.includes_timeline() {
        targets.push(FeedTarget::Timeline {
            creator_id: creator.id.clone(),
        });
    }
    if ctx.config.download_mode.includes_walls() {
        targets.extend(creator.walls.iter().map(|w| FeedTarget::Wall {
            creator_id: creator.id.clone(),
            wall_id: w.id.clone(),
        }));
    }

    let known_total = creator.timeline_media_count();
    tracing::info!(
        creator = %creator.username,
        feeds = targets.len(),
        known_media = known_total,
        "Syncing creator"
    );

    let mut summary = CreatorSummary::default();
    for target in &targets {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let kind = target.kind();
        let mut run = RunState::new(&creator.username, kind);
        let run_id = ctx.store.start_sync_run(&creator.username, kind.as_str()).await?;

        let result = paginator::run_feed(ctx, &mut run, target, None, known_total).await;

        let outcome = match &result {
            Ok(end) => end.as_str(),
            Err(_) => "error",
        };
        ctx.store.complete_sync_run(run_id, &run.to_stats(outcome)).await?;
        summary.add(&run);

        match result {
            Ok(end) => {
                log_end(&creator.username, target, &end, &run);
                if matches!(end, FeedEnd::DuplicateThreshold(_)) && !kind.supports_resumption() {
                    break;
                }
            }
            Err(e) if e.stops_process() || matches!(e, FeedError::State(_)) => return Err(e),
            Err(e) => {
                tracing::error!(creator = %creator.username, kind = %kind, "Feed failed: {}", e);
                acknowledge(ctx.config.interactive).await;
            }
        }
    }

    Ok(summary)
}
