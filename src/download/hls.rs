//! Chunked video: fetch an HLS playlist and join its segments into one file.
//!
//! Only unencrypted playlists are supported. A master playlist is resolved to
//! its highest-bandwidth variant first; the media playlist's optional
//! `#EXT-X-MAP` init section and all segments are then appended in order to
//! the `.part` file while hashing.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::DownloadError;
use super::file::{
    api_error, append_stream, classify, create_part, discard_part, fetch_stream, finish_attempts,
};
use crate::api::FeedApi;
use crate::retry::{self, RateLimitPolicy, RetryConfig};

#[derive(Debug, PartialEq, Eq)]
pub enum Playlist {
    /// Variant streams; the URL of the highest-bandwidth one.
    Master(Url),
    Media(MediaPlaylist),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MediaPlaylist {
    pub init: Option<Url>,
    pub segments: Vec<Url>,
}

fn invalid(url: &Url, reason: impl Into<String>) -> DownloadError {
    DownloadError::InvalidPlaylist {
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn join(base: &Url, uri: &str) -> Result<Url, DownloadError> {
    base.join(uri)
        .map_err(|e| invalid(base, format!("bad uri '{}': {}", uri, e)))
}

/// Value of `KEY=` in an attribute list, unquoted.
fn attribute<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = attrs;
    while !rest.is_empty() {
        let (name, after) = rest.split_once('=')?;
        let (value, tail) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], quoted[end + 1..].trim_start_matches(','))
        } else {
            match after.split_once(',') {
                Some((v, t)) => (v, t),
                None => (after, ""),
            }
        };
        if name.trim() == key {
            return Some(value);
        }
        rest = tail;
    }
    None
}

pub fn parse_playlist(text: &str, base: &Url) -> Result<Playlist, DownloadError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("#EXTM3U") {
        return Err(invalid(base, "missing #EXTM3U header"));
    }

    let mut best_variant: Option<(u64, Url)> = None;
    let mut pending_bandwidth: Option<u64> = None;
    let mut media = MediaPlaylist::default();

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending_bandwidth = Some(
                attribute(attrs, "BANDWIDTH")
                    .and_then(|b| b.parse().ok())
                    .unwrap_or(0),
            );
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-KEY:") {
            if attribute(attrs, "METHOD").is_some_and(|m| m != "NONE") {
                return Err(invalid(base, "encrypted playlist"));
            }
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-MAP:") {
            let uri = attribute(attrs, "URI").ok_or_else(|| invalid(base, "EXT-X-MAP without URI"))?;
            media.init = Some(join(base, uri)?);
        } else if line.starts_with('#') {
            continue;
        } else if let Some(bandwidth) = pending_bandwidth.take() {
            let url = join(base, line)?;
            if best_variant.as_ref().map_or(true, |(b, _)| bandwidth > *b) {
                best_variant = Some((bandwidth, url));
            }
        } else {
            media.segments.push(join(base, line)?);
        }
    }

    if let Some((_, url)) = best_variant {
        return Ok(Playlist::Master(url));
    }
    if media.segments.is_empty() {
        return Err(invalid(base, "no segments"));
    }
    Ok(Playlist::Media(media))
}

async fn fetch_playlist(
    api: &dyn FeedApi,
    url: &Url,
    policy: &RateLimitPolicy,
    cancel: &CancellationToken,
) -> Result<Playlist, DownloadError> {
    let text = retry::call_rate_limited(policy, cancel, || api.fetch_text(url.as_str()))
        .await
        .map_err(|source| api_error(source, url.to_string()))?;
    parse_playlist(&text, url)
}

/// Resolve `url` to a media playlist, following at most one master level.
async fn resolve_media_playlist(
    api: &dyn FeedApi,
    url: &Url,
    policy: &RateLimitPolicy,
    cancel: &CancellationToken,
) -> Result<MediaPlaylist, DownloadError> {
    match fetch_playlist(api, url, policy, cancel).await? {
        Playlist::Media(media) => Ok(media),
        Playlist::Master(variant) => match fetch_playlist(api, &variant, policy, cancel).await? {
            Playlist::Media(media) => Ok(media),
            Playlist::Master(_) => Err(invalid(&variant, "nested master playlist")),
        },
    }
}

/// Download a chunked video into `part`, returning the hex SHA-256 of the
/// joined file.
pub async fn download_hls(
    api: &dyn FeedApi,
    playlist_url: &str,
    part: &Path,
    policy: &RateLimitPolicy,
    retry_config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<String, DownloadError> {
    let url = Url::parse(playlist_url).map_err(|e| DownloadError::InvalidPlaylist {
        url: playlist_url.to_string(),
        reason: e.to_string(),
    })?;

    let result = retry::retry_with_backoff(retry_config, cancel, classify, || async {
        discard_part(part).await;
        let playlist = resolve_media_playlist(api, &url, policy, cancel).await?;
        let mut file = create_part(part).await?;
        let mut hasher = Sha256::new();
        let mut total = 0u64;
        for segment in playlist.init.iter().chain(playlist.segments.iter()) {
            let stream = fetch_stream(api, segment.as_str(), part, policy, cancel).await?;
            total += append_stream(&mut file, stream, &mut hasher, part, cancel).await?;
        }
        file.flush().await?;
        tracing::debug!(
            segments = playlist.segments.len(),
            bytes = total,
            path = %part.display(),
            "joined playlist segments"
        );
        Ok(hex::encode(hasher.finalize()))
    })
    .await;
    finish_attempts(result, part, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeApi;
    use std::time::Duration;

    fn base() -> Url {
        Url::parse("https://cdn.test/v/1/master.m3u8?sig=abc").unwrap()
    }

    #[test]
    fn test_master_picks_highest_bandwidth() {
        let text = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
            360p.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080,CODECS=\"avc1.640028,mp4a.40.2\"\n\
            1080p.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2500000\n\
            720p.m3u8\n";
        assert_eq!(
            parse_playlist(text, &base()).unwrap(),
            Playlist::Master(Url::parse("https://cdn.test/v/1/1080p.m3u8").unwrap())
        );
    }

    #[test]
    fn test_media_playlist_with_init_section() {
        let text = "#EXTM3U\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXT-X-MAP:URI=\"init.mp4\"\n\
            #EXTINF:6.0,\n\
            seg0.m4s\n\
            #EXTINF:6.0,\n\
            https://other.test/seg1.m4s\n\
            #EXT-X-ENDLIST\n";
        let Playlist::Media(media) = parse_playlist(text, &base()).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(media.init.unwrap().as_str(), "https://cdn.test/v/1/init.mp4");
        assert_eq!(
            media.segments,
            vec![
                Url::parse("https://cdn.test/v/1/seg0.m4s").unwrap(),
                Url::parse("https://other.test/seg1.m4s").unwrap(),
            ]
        );
    }

    #[test]
    fn test_rejects_encrypted_and_headerless() {
        let encrypted = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"k\"\n#EXTINF:1,\na.ts\n";
        assert!(matches!(
            parse_playlist(encrypted, &base()),
            Err(DownloadError::InvalidPlaylist { .. })
        ));
        assert!(parse_playlist("a.ts\n", &base()).is_err());
        assert!(parse_playlist("#EXTM3U\n#EXT-X-ENDLIST\n", &base()).is_err());
    }

    #[tokio::test]
    async fn test_download_joins_master_variant_segments() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new();
        api.add_text(
            "https://cdn.test/v/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nhi/index.m3u8\n",
        );
        api.add_text(
            "https://cdn.test/v/hi/index.m3u8",
            "#EXTM3U\n#EXTINF:1,\na.ts\n#EXTINF:1,\nb.ts\n#EXT-X-ENDLIST\n",
        );
        api.add_file("https://cdn.test/v/hi/a.ts", b"first-");
        api.add_file("https://cdn.test/v/hi/b.ts", b"second");
        let part = dir.path().join(".v.mp4.part");

        let policy = RateLimitPolicy {
            pre_call_delay: Duration::ZERO,
            ..RateLimitPolicy::default()
        };
        let hash = download_hls(
            &api,
            "https://cdn.test/v/master.m3u8",
            &part,
            &policy,
            &RetryConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&part).unwrap(), b"first-second");
        assert_eq!(hash, crate::download::file::hash_file(&part).await.unwrap());
    }
}
