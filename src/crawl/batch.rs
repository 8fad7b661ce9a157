use crate::api::FeedPage;
use crate::crawl::breaker::{check_threshold, DuplicateCountExceeded, DuplicateThreshold};
use crate::crawl::error::FeedError;
use crate::crawl::media;
use crate::crawl::run_state::RunState;
use crate::crawl::CrawlContext;
use crate::download::SaveError;
use crate::retry;

#[derive(Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    ThresholdReached(DuplicateCountExceeded),
    Cancelled,
}

/// Fetch metadata for `ids` in chunks, resolve accessible items and save
/// each one. The breaker is consulted before every item and once more after
/// the last, so a page full of duplicates stops the feed promptly.
///
/// Per-item failures are logged and counted; only state DB failures and
/// authorization errors end the feed.
pub async fn process_page(
    ctx: &CrawlContext,
    run: &mut RunState,
    page: &FeedPage,
    ids: &[String],
    threshold: &DuplicateThreshold,
) -> Result<BatchOutcome, FeedError> {
    let owners = media::post_owners(page);
    let batch_size = ctx.config.media_batch_size.max(1);

    for chunk in ids.chunks(batch_size) {
        if ctx.cancel.is_cancelled() {
            return Ok(BatchOutcome::Cancelled);
        }

        let infos = match retry::call_rate_limited(&ctx.config.rate_limit, &ctx.cancel, || {
            ctx.api.fetch_media_batch(chunk)
        })
        .await
        {
            Ok(infos) => infos,
            Err(e) if e.is_cancelled() => return Ok(BatchOutcome::Cancelled),
            Err(e) if e.is_unauthorized() => return Err(FeedError::Unauthorized(e)),
            Err(e) => {
                tracing::warn!(count = chunk.len(), "Media batch fetch failed: {}", e);
                for _ in chunk {
                    run.record_failure();
                }
                continue;
            }
        };

        for info in &infos {
            if ctx.cancel.is_cancelled() {
                return Ok(BatchOutcome::Cancelled);
            }

            let post_id = owners.get(&info.id).map(String::as_str);
            let Some(item) = media::resolve(info, post_id, ctx.config.include_previews) else {
                tracing::debug!(media_id = %info.id, "Media not accessible, skipping");
                continue;
            };

            let category = item.category();
            if let Some(category) = category {
                if run.is_seen(category, &item.media_id) {
                    run.record_duplicate();
                    continue;
                }
            }

            if let Err(tripped) = check_threshold(run, &ctx.config.threshold, threshold) {
                return Ok(BatchOutcome::ThresholdReached(tripped));
            }

            match ctx.saver.save_media(&item, run, &ctx.cancel).await {
                Ok(_) => {
                    if let Some(category) = category {
                        run.mark_seen(category, &item.media_id);
                    }
                }
                Err(SaveError::Cancelled) => return Ok(BatchOutcome::Cancelled),
                Err(SaveError::State(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("{}", e);
                    run.record_failure();
                }
            }
        }
    }

    if let Err(tripped) = check_threshold(run, &ctx.config.threshold, threshold) {
        return Ok(BatchOutcome::ThresholdReached(tripped));
    }
    Ok(BatchOutcome::Completed)
}
