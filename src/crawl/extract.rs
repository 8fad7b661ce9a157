use std::collections::BTreeSet;

use thiserror::Error;

use crate::api::FeedPage;

/// A page whose media references cannot be trusted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("page has neither accountMedia nor accountMediaBundles")]
    NoMediaKey,

    #[error("null entry at accountMedia[{0}]")]
    NullMedia(usize),

    #[error("null bundle at accountMediaBundles[{0}]")]
    NullBundle(usize),

    #[error("null id at accountMediaBundles[{bundle}].accountMediaIds[{index}]")]
    NullBundleMedia { bundle: usize, index: usize },
}

/// Collect the unique media ids referenced by a page: the flat media list
/// plus every id inside every bundle. Sorted, duplicates collapsed.
///
/// A `null` anywhere in either list fails the whole call; it means the API
/// returned something irregular and no partial result is returned.
pub fn extract_media_ids(page: &FeedPage) -> Result<Vec<String>, ExtractError> {
    if page.account_media.is_none() && page.account_media_bundles.is_none() {
        return Err(ExtractError::NoMediaKey);
    }

    let mut ids = BTreeSet::new();

    for (i, entry) in page.account_media.iter().flatten().enumerate() {
        let media = entry.as_ref().ok_or(ExtractError::NullMedia(i))?;
        ids.insert(media.id.as_str());
    }

    for (b, bundle) in page.account_media_bundles.iter().flatten().enumerate() {
        let bundle = bundle.as_ref().ok_or(ExtractError::NullBundle(b))?;
        for (index, id) in bundle.account_media_ids.iter().enumerate() {
            let id = id
                .as_deref()
                .ok_or(ExtractError::NullBundleMedia { bundle: b, index })?;
            ids.insert(id);
        }
    }

    Ok(ids.into_iter().map(str::to_string).collect())
}
