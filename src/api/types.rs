//! Wire types for the remote feed API.
//!
//! Media lists are kept as `Vec<Option<_>>` so a `null` entry survives
//! deserialization and can be rejected by the extractor instead of being
//! silently dropped.

use serde::Deserialize;

/// Standard response envelope: `{"success": true, "response": ...}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub response: Option<T>,
}

/// A creator account and the walls it exposes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub walls: Vec<Wall>,
    pub timeline_stats: Option<TimelineStats>,
}

impl Creator {
    /// Known amount of timeline media, used to scale the duplicate threshold.
    pub fn timeline_media_count(&self) -> u64 {
        self.timeline_stats
            .as_ref()
            .map(|s| s.image_count + s.video_count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineStats {
    #[serde(default)]
    pub image_count: u64,
    #[serde(default)]
    pub video_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wall {
    pub id: String,
    pub name: Option<String>,
}

/// One page of a timeline or wall feed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    #[serde(default)]
    pub posts: Vec<FeedPost>,
    pub account_media: Option<Vec<Option<MediaRef>>>,
    pub account_media_bundles: Option<Vec<Option<MediaBundle>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: String,
    pub account_id: Option<String>,
    pub created_at: Option<i64>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBundle {
    pub id: Option<String>,
    #[serde(default)]
    pub account_media_ids: Vec<Option<String>>,
}

/// Metadata for one account media item as returned by the batch endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub created_at: i64,
    pub media: Option<MediaAsset>,
    pub preview: Option<MediaAsset>,
}

/// A concrete file (or one of its encoded variants).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub id: String,
    pub mimetype: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub locations: Vec<MediaLocation>,
    #[serde(default)]
    pub variants: Vec<MediaAsset>,
}

impl MediaAsset {
    pub fn first_location(&self) -> Option<&str> {
        self.locations
            .iter()
            .map(|l| l.location.as_str())
            .find(|l| !l.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaLocation {
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feed_page_keeps_null_entries() {
        let page: FeedPage = serde_json::from_value(json!({
            "posts": [{"id": "p1"}],
            "accountMedia": [{"id": "m1"}, null],
            "accountMediaBundles": [{"id": "b1", "accountMediaIds": ["m2", null]}]
        }))
        .unwrap();
        let media = page.account_media.unwrap();
        assert_eq!(media.len(), 2);
        assert!(media[1].is_none());
        let bundles = page.account_media_bundles.unwrap();
        assert!(bundles[0].as_ref().unwrap().account_media_ids[1].is_none());
    }

    #[test]
    fn test_feed_page_missing_media_keys() {
        let page: FeedPage = serde_json::from_value(json!({"posts": []})).unwrap();
        assert!(page.account_media.is_none());
        assert!(page.account_media_bundles.is_none());
    }

    #[test]
    fn test_creator_timeline_media_count() {
        let creator: Creator = serde_json::from_value(json!({
            "id": "c1",
            "username": "someone",
            "walls": [{"id": "w1", "name": "Main"}],
            "timelineStats": {"imageCount": 120, "videoCount": 30}
        }))
        .unwrap();
        assert_eq!(creator.timeline_media_count(), 150);
        assert_eq!(creator.walls[0].name.as_deref(), Some("Main"));
    }
}
