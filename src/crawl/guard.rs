use std::time::Duration;

use thiserror::Error;

use crate::api::FeedPage;
use crate::state::{StateDb, StateError};
use crate::types::FeedKind;

/// Every post on a page is already recorded: the feed is synced from here on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("All posts on {kind} page before cursor {cursor} are already known ({label})")]
pub struct DuplicatePage {
    pub kind: FeedKind,
    pub feed_id: Option<String>,
    pub cursor: String,
    /// Wall display name when known, else the feed id.
    pub label: String,
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    DuplicatePage(#[from] DuplicatePage),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Page-level duplicate check against the persisted post store.
pub struct PageGuard<'a> {
    pub store: &'a dyn StateDb,
    pub enabled: bool,
    /// Slept before signalling so the abort does not immediately follow a
    /// burst of API calls.
    pub cooldown: Duration,
}

impl PageGuard<'_> {
    /// Abort the feed if every post of `page` already exists in the post
    /// store. Disabled guards and empty pages always pass.
    pub async fn check_page_duplicates(
        &self,
        page: &FeedPage,
        kind: FeedKind,
        feed_id: Option<&str>,
        cursor: &str,
    ) -> Result<(), GuardError> {
        if !self.enabled || page.posts.is_empty() {
            return Ok(());
        }

        for post in &page.posts {
            if !self.store.post_exists(&post.id).await? {
                return Ok(());
            }
        }

        let label = match (kind, feed_id) {
            (FeedKind::Wall, Some(id)) => self
                .store
                .wall_name(id)
                .await?
                .unwrap_or_else(|| id.to_string()),
            (_, Some(id)) => id.to_string(),
            (_, None) => kind.as_str().to_string(),
        };

        tracing::debug!(
            kind = %kind,
            cursor,
            posts = page.posts.len(),
            "Page fully known, cooling down before stopping"
        );
        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }

        Err(DuplicatePage {
            kind,
            feed_id: feed_id.map(str::to_string),
            cursor: cursor.to_string(),
            label,
        }
        .into())
    }
}
