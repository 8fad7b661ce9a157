//! Duplicate-count circuit breaker.
//!
//! A high density of already-downloaded media means the rest of the feed is
//! most likely synced too. The breaker stops the feed once the duplicate
//! counter passes a threshold that is scaled per feed kind and per page.

use thiserror::Error;

use crate::crawl::run_state::RunState;
use crate::types::FeedKind;

#[derive(Debug, Clone, Copy)]
pub struct ThresholdConfig {
    pub enabled: bool,
    /// Base duplicate threshold.
    pub base: u64,
    /// Thresholds below this never trip.
    pub floor: u64,
    /// Timeline threshold as a percentage of the creator's known media.
    pub timeline_percent: u64,
    /// Wall threshold as a percentage of the current page's media count.
    pub wall_percent: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base: 50,
            floor: 50,
            timeline_percent: 20,
            wall_percent: 50,
        }
    }
}

/// Effective threshold for one page. Computed by the paginator and passed to
/// the orchestrator as a value; the base configuration is never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateThreshold {
    pub limit: u64,
}

impl DuplicateThreshold {
    pub fn base(config: &ThresholdConfig) -> Self {
        Self { limit: config.base }
    }

    /// Scale the limit for one page of a feed. Timelines use a share of the
    /// creator's known media, walls a share of the page's media. A scaled
    /// limit under the floor leaves the breaker inert for that page.
    pub fn for_page(
        kind: FeedKind,
        config: &ThresholdConfig,
        known_total: u64,
        batch_len: usize,
    ) -> Self {
        match kind {
            FeedKind::Timeline => Self {
                limit: known_total.saturating_mul(config.timeline_percent) / 100,
            },
            FeedKind::Wall => Self {
                limit: (batch_len as u64).saturating_mul(config.wall_percent) / 100,
            },
            FeedKind::Messages | FeedKind::Collection => Self::base(config),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Duplicate count {count} exceeded threshold {limit}")]
pub struct DuplicateCountExceeded {
    pub count: u64,
    pub limit: u64,
}

/// Trip when enforcement is on, the cumulative duplicate counter is above
/// the limit, and the limit is not below the configured floor.
pub fn check_threshold(
    run: &RunState,
    config: &ThresholdConfig,
    threshold: &DuplicateThreshold,
) -> Result<(), DuplicateCountExceeded> {
    if !config.enabled || threshold.limit < config.floor {
        return Ok(());
    }
    let count = run.duplicate_count;
    if count > threshold.limit {
        return Err(DuplicateCountExceeded {
            count,
            limit: threshold.limit,
        });
    }
    Ok(())
}
