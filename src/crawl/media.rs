use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::api::{FeedPage, MediaAsset, MediaInfo};
use crate::download::paths;
use crate::state::MediaRecord;

pub const HLS_MIMETYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
}

impl MediaCategory {
    pub fn from_mimetype(mimetype: &str) -> Option<Self> {
        let top = mimetype.split('/').next().unwrap_or("");
        match top {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ if mimetype == HLS_MIMETYPE => Some(Self::Video),
            _ => None,
        }
    }

    /// Folder name under the creator directory.
    pub fn folder(self) -> &'static str {
        match self {
            Self::Image => "Pictures",
            Self::Video => "Videos",
            Self::Audio => "Audio",
        }
    }
}

/// One downloadable item derived from a page's media metadata.
#[derive(Debug, Clone)]
pub struct CandidateMediaItem {
    pub media_id: String,
    pub account_id: String,
    pub post_id: Option<String>,
    pub mimetype: Option<String>,
    pub download_url: Option<String>,
    pub is_preview: bool,
    pub created_at: DateTime<Utc>,
    pub filename: String,
    pub extension: String,
}

impl CandidateMediaItem {
    pub fn category(&self) -> Option<MediaCategory> {
        self.mimetype.as_deref().and_then(MediaCategory::from_mimetype)
    }

    /// Segmented video delivered as an HLS playlist.
    pub fn is_chunked(&self) -> bool {
        self.mimetype.as_deref() == Some(HLS_MIMETYPE)
            || self
                .download_url
                .as_deref()
                .map(|u| u.split('?').next().unwrap_or(u).ends_with(".m3u8"))
                .unwrap_or(false)
    }

    pub fn to_record(&self) -> MediaRecord {
        let mut record = MediaRecord::new(&self.media_id, &self.account_id);
        record.mimetype = self.mimetype.clone();
        record.created_at = Some(self.created_at);
        record
    }
}

/// Map every media id on a page to the post that attaches it, either
/// directly or through a bundle.
pub fn post_owners(page: &FeedPage) -> HashMap<String, String> {
    let mut bundles: HashMap<&str, Vec<&str>> = HashMap::new();
    for bundle in page.account_media_bundles.iter().flatten().flatten() {
        if let Some(id) = bundle.id.as_deref() {
            bundles.insert(
                id,
                bundle.account_media_ids.iter().flatten().map(String::as_str).collect(),
            );
        }
    }

    let mut owners = HashMap::new();
    for post in &page.posts {
        for attachment in &post.attachments {
            match bundles.get(attachment.content_id.as_str()) {
                Some(ids) => {
                    for id in ids {
                        owners
                            .entry(id.to_string())
                            .or_insert_with(|| post.id.clone());
                    }
                }
                None => {
                    owners
                        .entry(attachment.content_id.clone())
                        .or_insert_with(|| post.id.clone());
                }
            }
        }
    }
    owners
}

/// Pick the best downloadable variant of `info`.
///
/// Returns `None` when the item is not accessible: no location on the main
/// asset or its variants, and no usable preview (or previews disabled).
pub fn resolve(
    info: &MediaInfo,
    post_id: Option<&str>,
    include_previews: bool,
) -> Option<CandidateMediaItem> {
    let (asset, is_preview) = match info.media.as_ref().and_then(best_variant) {
        Some(asset) => (asset, false),
        None if include_previews => (info.preview.as_ref().and_then(best_variant)?, true),
        None => return None,
    };

    let mimetype = asset.mimetype.clone();
    let extension = paths::extension_for_mimetype(mimetype.as_deref());
    let created_at = timestamp(info.created_at);
    let filename = paths::media_filename(&created_at, &info.id, is_preview, &extension);

    Some(CandidateMediaItem {
        media_id: info.id.clone(),
        account_id: info.account_id.clone(),
        post_id: post_id.map(str::to_string),
        mimetype,
        download_url: asset.first_location().map(str::to_string),
        is_preview,
        created_at,
        filename,
        extension,
    })
}

/// Highest resolution candidate with a location among the asset and its
/// variants. On a resolution tie a direct file beats a playlist.
fn best_variant(asset: &MediaAsset) -> Option<&MediaAsset> {
    std::iter::once(asset)
        .chain(asset.variants.iter())
        .filter(|a| a.first_location().is_some())
        .max_by_key(|a| {
            let pixels = u64::from(a.width) * u64::from(a.height);
            let direct = a.mimetype.as_deref() != Some(HLS_MIMETYPE);
            (pixels, direct)
        })
}

/// The API reports seconds, occasionally milliseconds.
fn timestamp(raw: i64) -> DateTime<Utc> {
    let secs = if raw > 10_000_000_000 { raw / 1000 } else { raw };
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
