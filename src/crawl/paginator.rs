//! Cursor-driven feed pagination.
//!
//! A feed is walked newest to oldest. Each page is checked against the post
//! store, its media ids are extracted and handed to the batch orchestrator,
//! and the cursor moves to the last post's id. The walk ends when the feed
//! runs out, a page is entirely known, the duplicate breaker trips, or
//! shutdown is requested.

use std::io::IsTerminal;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng as _;

use crate::api::{ApiError, FeedApi, FeedPage};
use crate::crawl::batch::{self, BatchOutcome};
use crate::crawl::breaker::{DuplicateCountExceeded, DuplicateThreshold};
use crate::crawl::error::FeedError;
use crate::crawl::extract::{extract_media_ids, ExtractError};
use crate::crawl::guard::{DuplicatePage, GuardError, PageGuard};
use crate::crawl::run_state::RunState;
use crate::crawl::{acknowledge, pause, CrawlContext};
use crate::retry;
use crate::state::PostRecord;
use crate::types::FeedKind;

/// A full wall page holds this many posts; fewer means the wall is done.
pub const WALL_PAGE_SIZE: usize = 15;

/// Which feed to walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedTarget {
    Timeline { creator_id: String },
    Wall { creator_id: String, wall_id: String },
}

impl FeedTarget {
    pub fn kind(&self) -> FeedKind {
        match self {
            FeedTarget::Timeline { .. } => FeedKind::Timeline,
            FeedTarget::Wall { .. } => FeedKind::Wall,
        }
    }

    /// Id used in log lines and duplicate-page reports.
    pub fn feed_id(&self) -> &str {
        match self {
            FeedTarget::Timeline { creator_id } => creator_id,
            FeedTarget::Wall { wall_id, .. } => wall_id,
        }
    }

    async fn fetch(&self, api: &dyn FeedApi, cursor: &str) -> Result<FeedPage, ApiError> {
        match self {
            FeedTarget::Timeline { creator_id } => api.fetch_timeline_page(creator_id, cursor).await,
            FeedTarget::Wall {
                creator_id,
                wall_id,
            } => api.fetch_wall_page(creator_id, wall_id, cursor).await,
        }
    }
}

/// How a feed walk ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEnd {
    /// Ran out of pages, or empty pages exhausted the retry budget.
    Exhausted,
    DuplicatePage(DuplicatePage),
    DuplicateThreshold(DuplicateCountExceeded),
    Cancelled,
}

impl FeedEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedEnd::Exhausted => "exhausted",
            FeedEnd::DuplicatePage(_) => "duplicate_page",
            FeedEnd::DuplicateThreshold(_) => "duplicate_threshold",
            FeedEnd::Cancelled => "cancelled",
        }
    }
}

/// Cursor for the page after `page`, or `None` when the feed is finished.
pub fn next_cursor(kind: FeedKind, page: &FeedPage, current: &str) -> Option<String> {
    let last = page.posts.last()?;
    if kind == FeedKind::Wall && page.posts.len() < WALL_PAGE_SIZE {
        return None;
    }
    if last.id == current {
        return None;
    }
    Some(last.id.clone())
}

enum State {
    Fetching,
    /// An empty or failed page; waits `timeline_delay` before the same
    /// cursor is fetched again.
    EmptyRetry,
    Processing { page: FeedPage, ids: Vec<String> },
    Advancing { page: FeedPage },
    Terminated(FeedEnd),
}

fn create_spinner(show_progress: bool, prefix: String) -> ProgressBar {
    if !show_progress || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {prefix}: {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn post_records(page: &FeedPage) -> Vec<PostRecord> {
    page.posts
        .iter()
        .map(|p| PostRecord {
            id: p.id.clone(),
            account_id: p.account_id.clone(),
            created_at: p.created_at.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        })
        .collect()
}

fn random_page_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let ms = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(ms as u64)
}

/// Result of fetching and screening one page.
enum Fetched {
    Page { page: FeedPage, ids: Vec<String> },
    Empty,
    Known(DuplicatePage),
    /// Transient failure, already logged.
    Failed,
    Cancelled,
}

async fn fetch_stage(
    ctx: &CrawlContext,
    guard: &PageGuard<'_>,
    target: &FeedTarget,
    cursor: &str,
    pb: &ProgressBar,
) -> Result<Fetched, FeedError> {
    let kind = target.kind();
    let fetched = retry::call_rate_limited(&ctx.config.rate_limit, &ctx.cancel, || {
        target.fetch(ctx.api.as_ref(), cursor)
    })
    .await;
    let page = match fetched {
        Ok(page) => page,
        Err(e) if e.is_cancelled() => return Ok(Fetched::Cancelled),
        Err(e) if e.is_unauthorized() => return Err(FeedError::Unauthorized(e)),
        Err(e) => {
            pb.suspend(|| tracing::warn!(kind = %kind, cursor, "Page fetch failed: {}", e));
            return Ok(Fetched::Failed);
        }
    };

    match guard
        .check_page_duplicates(&page, kind, Some(target.feed_id()), cursor)
        .await
    {
        Ok(()) => {}
        Err(GuardError::DuplicatePage(dup)) => return Ok(Fetched::Known(dup)),
        Err(GuardError::State(e)) => return Err(e.into()),
    }

    match extract_media_ids(&page) {
        Ok(ids) if ids.is_empty() => Ok(Fetched::Empty),
        Ok(ids) => Ok(Fetched::Page { page, ids }),
        Err(ExtractError::NoMediaKey) => Err(FeedError::InvalidPayload(format!(
            "{} page before {} has no media keys",
            kind, cursor
        ))),
        Err(e) => {
            pb.suspend(|| tracing::warn!(kind = %kind, cursor, "Irregular page: {}", e));
            Ok(Fetched::Failed)
        }
    }
}

/// Walk one feed starting at `start_cursor` (`None` = newest).
///
/// `known_total` is the creator's known media count, used to scale the
/// timeline duplicate threshold.
pub async fn run_feed(
    ctx: &CrawlContext,
    run: &mut RunState,
    target: &FeedTarget,
    start_cursor: Option<&str>,
    known_total: u64,
) -> Result<FeedEnd, FeedError> {
    let pb = create_spinner(
        ctx.config.show_progress,
        format!("{} {}", run.creator, target.kind()),
    );
    let result = walk(ctx, run, target, start_cursor, known_total, &pb).await;
    pb.finish_and_clear();
    result
}

async fn walk(
    ctx: &CrawlContext,
    run: &mut RunState,
    target: &FeedTarget,
    start_cursor: Option<&str>,
    known_total: u64,
    pb: &ProgressBar,
) -> Result<FeedEnd, FeedError> {
    let kind = target.kind();
    let config = &ctx.config;
    let guard = PageGuard {
        store: ctx.store.as_ref(),
        enabled: config.use_pagination_duplication,
        cooldown: config.duplicate_page_cooldown,
    };

    let mut cursor = start_cursor
        .filter(|c| !c.is_empty())
        .unwrap_or("0")
        .to_string();
    let mut attempts: u32 = 0;
    let mut state = State::Fetching;

    loop {
        state = match state {
            State::Fetching if ctx.cancel.is_cancelled() => State::Terminated(FeedEnd::Cancelled),
            State::Fetching => {
                pb.set_message(format!("page {} (before {})", run.pages + 1, cursor));
                let stage = fetch_stage(ctx, &guard, target, &cursor, pb).await?;
                match stage {
                    Fetched::Page { page, ids } => {
                        attempts = 0;
                        State::Processing { page, ids }
                    }
                    Fetched::Empty => State::EmptyRetry,
                    Fetched::Known(dup) => State::Terminated(FeedEnd::DuplicatePage(dup)),
                    Fetched::Failed => {
                        acknowledge(config.interactive).await;
                        State::EmptyRetry
                    }
                    Fetched::Cancelled => State::Terminated(FeedEnd::Cancelled),
                }
            }

            State::EmptyRetry => {
                attempts += 1;
                if attempts > config.timeline_retries {
                    State::Terminated(FeedEnd::Exhausted)
                } else {
                    tracing::debug!(
                        kind = %kind,
                        cursor = %cursor,
                        attempt = attempts,
                        "Nothing usable on page, retrying in {}s",
                        config.timeline_delay.as_secs()
                    );
                    if pause(&ctx.cancel, config.timeline_delay).await {
                        State::Fetching
                    } else {
                        State::Terminated(FeedEnd::Cancelled)
                    }
                }
            }

            State::Processing { page, ids } => {
                run.begin_batch();
                let threshold =
                    DuplicateThreshold::for_page(kind, &config.threshold, known_total, ids.len());
                let outcome = batch::process_page(ctx, run, &page, &ids, &threshold).await?;
                tracing::debug!(
                    kind = %kind,
                    cursor = %cursor,
                    page_duplicates = run.batch_duplicate_count,
                    total_duplicates = run.duplicate_count,
                    limit = threshold.limit,
                    "Page processed"
                );
                if outcome != BatchOutcome::Cancelled {
                    ctx.store.record_posts(&post_records(&page)).await?;
                }
                pb.set_message(format!(
                    "{} downloaded, {} duplicates",
                    run.downloaded_total(),
                    run.duplicate_count
                ));
                match outcome {
                    BatchOutcome::Completed => State::Advancing { page },
                    BatchOutcome::ThresholdReached(tripped) => {
                        State::Terminated(FeedEnd::DuplicateThreshold(tripped))
                    }
                    BatchOutcome::Cancelled => State::Terminated(FeedEnd::Cancelled),
                }
            }

            State::Advancing { page } => match next_cursor(kind, &page, &cursor) {
                None => State::Terminated(FeedEnd::Exhausted),
                Some(next) => {
                    cursor = next;
                    let delay = random_page_delay(config.page_delay_min, config.page_delay_max);
                    if pause(&ctx.cancel, delay).await {
                        State::Fetching
                    } else {
                        State::Terminated(FeedEnd::Cancelled)
                    }
                }
            },

            State::Terminated(end) => return Ok(end),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FeedPost;
    use crate::state::{PostRecord, StateDb};
    use crate::test_support::{media_info, page_with_media, TestEnv};
    use std::sync::atomic::Ordering;

    fn posts(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{:02}", prefix, i)).collect()
    }

    fn refs(v: &[String]) -> Vec<&str> {
        v.iter().map(String::as_str).collect()
    }

    fn timeline() -> FeedTarget {
        FeedTarget::Timeline {
            creator_id: "c1".into(),
        }
    }

    fn wall() -> FeedTarget {
        FeedTarget::Wall {
            creator_id: "c1".into(),
            wall_id: "w1".into(),
        }
    }

    #[test]
    fn test_wall_full_page_continues_with_last_id() {
        let ids = posts("p", WALL_PAGE_SIZE);
        let page = page_with_media(&refs(&ids), &["m1"]);
        assert_eq!(next_cursor(FeedKind::Wall, &page, "0").as_deref(), Some("p14"));
    }

    #[test]
    fn test_wall_short_page_terminates() {
        let ids = posts("p", WALL_PAGE_SIZE - 1);
        let page = page_with_media(&refs(&ids), &["m1"]);
        assert_eq!(next_cursor(FeedKind::Wall, &page, "0"), None);
        // Timeline pages have no size rule.
        assert_eq!(next_cursor(FeedKind::Timeline, &page, "0").as_deref(), Some("p13"));
    }

    #[test]
    fn test_empty_or_stuck_page_terminates() {
        assert_eq!(next_cursor(FeedKind::Timeline, &FeedPage::default(), "0"), None);
        let page = FeedPage {
            posts: vec![FeedPost {
                id: "p1".into(),
                ..FeedPost::default()
            }],
            ..FeedPage::default()
        };
        assert_eq!(next_cursor(FeedKind::Timeline, &page, "p1"), None);
    }

    #[test]
    fn test_random_page_delay_bounds() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(200);
        for _ in 0..50 {
            let d = random_page_delay(min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(random_page_delay(max, min), max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_walks_until_short_page() {
        let env = TestEnv::new();
        let first = posts("b", WALL_PAGE_SIZE);
        env.api.add_wall_page("w1", "0", page_with_media(&refs(&first), &["m1"]));
        let second = posts("a", 3);
        env.api.add_wall_page("w1", "b14", page_with_media(&refs(&second), &["m2"]));
        for id in ["m1", "m2"] {
            env.api.add_media(media_info(id));
            env.api.add_file(&format!("https://cdn.test/{}.jpg", id), id.as_bytes());
        }
        let mut run = RunState::new("alice", FeedKind::Wall);

        let end = run_feed(&env.ctx, &mut run, &wall(), None, 0).await.unwrap();

        assert_eq!(end, FeedEnd::Exhausted);
        assert_eq!(env.api.page_calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.pictures_downloaded, 2);
        assert_eq!(run.pages, 2);
        assert!(env.store.post_exists("b00").await.unwrap());
        assert!(env.store.post_exists("a02").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pages_exhaust_retry_budget() {
        let env = TestEnv::new();
        env.api.add_timeline_page("0", page_with_media(&["p1"], &[]));
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let started = tokio::time::Instant::now();
        let end = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap();

        assert_eq!(end, FeedEnd::Exhausted);
        // One initial fetch plus `timeline_retries` (1) retries.
        assert_eq!(env.api.page_calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= env.ctx.config.timeline_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_page_aborts_when_guard_enabled() {
        let mut env = TestEnv::new();
        env.ctx.config.use_pagination_duplication = true;
        env.store
            .record_posts(&[PostRecord {
                id: "p1".into(),
                account_id: None,
                created_at: None,
            }])
            .await
            .unwrap();
        env.api.add_timeline_page("0", page_with_media(&["p1"], &["m1"]));
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let end = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap();

        assert!(matches!(end, FeedEnd::DuplicatePage(ref d) if d.cursor == "0"));
        assert_eq!(env.api.media_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_page_processed_when_guard_disabled() {
        let env = TestEnv::new();
        env.store
            .record_posts(&[PostRecord {
                id: "p1".into(),
                account_id: None,
                created_at: None,
            }])
            .await
            .unwrap();
        env.api.add_timeline_page("0", page_with_media(&["p1"], &["m1"]));
        env.api.add_media(media_info("m1"));
        env.api.add_file("https://cdn.test/m1.jpg", b"m1");
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let end = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap();

        // Nothing is scripted at the next cursor "p1"; its failed fetches
        // use up the retry budget.
        assert_eq!(end, FeedEnd::Exhausted);
        assert_eq!(run.pictures_downloaded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_media_keys_are_fatal() {
        let env = TestEnv::new();
        let mut page = page_with_media(&["p1"], &[]);
        page.account_media = None;
        page.account_media_bundles = None;
        env.api.add_timeline_page("0", page);
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let err = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidPayload(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retries_same_cursor() {
        let env = TestEnv::new();
        env.api.push_page_error(ApiError::HttpStatus {
            status: 502,
            url: "u".into(),
        });
        env.api.add_timeline_page("0", page_with_media(&[], &["m1"]));
        env.api.add_media(media_info("m1"));
        env.api.add_file("https://cdn.test/m1.jpg", b"m1");
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let started = tokio::time::Instant::now();
        let end = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap();

        assert_eq!(end, FeedEnd::Exhausted);
        assert_eq!(env.api.page_calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.pictures_downloaded, 1);
        assert!(started.elapsed() >= env.ctx.config.timeline_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_wait_between_attempts() {
        let env = TestEnv::new();
        for _ in 0..2 {
            env.api.push_page_error(ApiError::HttpStatus {
                status: 502,
                url: "u".into(),
            });
        }
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let started = tokio::time::Instant::now();
        let end = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap();

        assert_eq!(end, FeedEnd::Exhausted);
        assert_eq!(env.api.page_calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= env.ctx.config.timeline_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_rate_limited_page() {
        let env = TestEnv::new();
        for _ in 0..20 {
            env.api.push_page_error(ApiError::RateLimited { url: "u".into() });
        }
        let trigger = env.ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let started = tokio::time::Instant::now();
        let end = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap();

        assert_eq!(end, FeedEnd::Cancelled);
        assert_eq!(env.api.page_calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_is_fatal() {
        let env = TestEnv::new();
        env.api.push_page_error(ApiError::Unauthorized {
            status: 401,
            url: "u".into(),
        });
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let err = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap_err();
        assert!(err.stops_process());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let env = TestEnv::new();
        env.ctx.cancel.cancel();
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let end = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap();

        assert_eq!(end, FeedEnd::Cancelled);
        assert_eq!(env.api.page_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_page_is_retried_transparently() {
        let env = TestEnv::new();
        env.api.push_page_error(ApiError::RateLimited { url: "u".into() });
        env.api.add_timeline_page("0", page_with_media(&[], &["m1"]));
        env.api.add_media(media_info("m1"));
        env.api.add_file("https://cdn.test/m1.jpg", b"m1");
        let mut run = RunState::new("alice", FeedKind::Timeline);

        let started = tokio::time::Instant::now();
        let end = run_feed(&env.ctx, &mut run, &timeline(), None, 0).await.unwrap();

        assert_eq!(end, FeedEnd::Exhausted);
        assert_eq!(run.pictures_downloaded, 1);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
