use std::fs::FileTimes;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;
use crate::api::{ByteStream, FeedApi};
use crate::retry::{self, RateLimitPolicy, RetryAction, RetryConfig};

/// Hidden `.part` sibling of the final path. Lives in the same directory so
/// the final rename never crosses filesystems.
pub fn part_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.part", name))
}

/// SHA-256 of a file on disk, hex-encoded.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(std::io::Error::other)?
}

pub(crate) fn classify(e: &DownloadError) -> RetryAction {
    if e.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

/// Download `url` into `part`, returning the hex SHA-256 of the bytes
/// written.
///
/// Each attempt deletes any existing `.part` file and downloads from
/// scratch. The part file is removed when the download is cancelled or
/// finally fails; renaming it into place is the caller's job.
pub async fn download_file(
    api: &dyn FeedApi,
    url: &str,
    part: &Path,
    policy: &RateLimitPolicy,
    retry_config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<String, DownloadError> {
    let result = retry::retry_with_backoff(retry_config, cancel, classify, || async {
        discard_part(part).await;
        let mut file = create_part(part).await?;
        let stream = fetch_stream(api, url, part, policy, cancel).await?;
        let mut hasher = Sha256::new();
        let bytes = append_stream(&mut file, stream, &mut hasher, part, cancel).await?;
        file.flush().await?;
        tracing::debug!(bytes, path = %part.display(), "transfer complete");
        Ok(hex::encode(hasher.finalize()))
    })
    .await;
    finish_attempts(result, part, cancel).await
}

/// Remove a stale or abandoned `.part` file. A missing file is fine.
pub(crate) async fn discard_part(part: &Path) {
    match fs::remove_file(part).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!("Could not remove {}: {}", part.display(), e),
    }
}

/// Clean up after the last attempt. An error that surfaced while shutdown
/// was pending is reported as a cancellation.
pub(crate) async fn finish_attempts(
    result: Result<String, DownloadError>,
    part: &Path,
    cancel: &CancellationToken,
) -> Result<String, DownloadError> {
    match result {
        Ok(hash) => Ok(hash),
        Err(e) => {
            discard_part(part).await;
            if cancel.is_cancelled() {
                Err(DownloadError::Cancelled)
            } else {
                Err(e)
            }
        }
    }
}

/// Map an API failure for `path`, keeping shutdown distinct.
pub(crate) fn api_error(source: crate::api::ApiError, path: String) -> DownloadError {
    if source.is_cancelled() {
        DownloadError::Cancelled
    } else {
        DownloadError::Api { source, path }
    }
}

pub(crate) async fn create_part(part: &Path) -> Result<File, DownloadError> {
    if let Some(parent) = part.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part)
        .await?)
}

/// Open a download stream through the rate-limited wrapper, giving up early
/// if shutdown is requested while backing off.
pub(crate) async fn fetch_stream(
    api: &dyn FeedApi,
    url: &str,
    part: &Path,
    policy: &RateLimitPolicy,
    cancel: &CancellationToken,
) -> Result<ByteStream, DownloadError> {
    retry::call_rate_limited(policy, cancel, || api.download(url))
        .await
        .map_err(|source| api_error(source, part.display().to_string()))
}

/// Write every chunk of `stream` to `file`, feeding the hasher as it goes.
/// Returns the number of bytes written.
pub(crate) async fn append_stream(
    file: &mut File,
    mut stream: ByteStream,
    hasher: &mut Sha256,
    part: &Path,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut written = 0u64;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            return Ok(written);
        };
        let chunk = chunk.map_err(|source| {
            tracing::warn!(bytes_so_far = written, path = %part.display(), "Body error: {}", source);
            DownloadError::Api {
                source,
                path: part.display().to_string(),
            }
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
}

/// Atomically move a finished `.part` file to its final path.
pub async fn promote(part: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(part, target).await
}

/// Stamp a saved file with the media creation time. Failures are logged and
/// otherwise ignored.
pub async fn stamp_mtime(path: &Path, timestamp: i64) {
    let owned = path.to_path_buf();
    match tokio::task::spawn_blocking(move || set_file_mtime(&owned, timestamp)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Could not set mtime on {}: {}", path.display(), e),
        Err(e) => tracing::warn!("mtime task failed for {}: {}", path.display(), e),
    }
}

/// Set the modification and access times of a file to the given Unix
/// timestamp. Negative timestamps (dates before 1970) are clamped to the
/// epoch when the platform cannot represent them.
fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::test_support::FakeApi;

    fn quick_policy() -> RateLimitPolicy {
        RateLimitPolicy {
            pre_call_delay: Duration::ZERO,
            ..RateLimitPolicy::default()
        }
    }

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            base_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    #[test]
    fn test_part_path_is_hidden_sibling() {
        assert_eq!(
            part_path(Path::new("/a/b/video.mp4")),
            PathBuf::from("/a/b/.video.mp4.part")
        );
    }

    #[tokio::test]
    async fn test_hash_file_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            hash_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_download_writes_part_and_returns_hash() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new();
        api.add_file("https://cdn.test/a.jpg", b"hello world");
        let part = dir.path().join(".a.jpg.part");

        let hash = download_file(
            &api,
            "https://cdn.test/a.jpg",
            &part,
            &quick_policy(),
            &no_retry(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&part).unwrap(), b"hello world");
        assert_eq!(hash, hash_file(&part).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_download_removes_part() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new();
        let part = dir.path().join(".missing.part");
        std::fs::write(&part, b"stale").unwrap();

        let err = download_file(
            &api,
            "https://cdn.test/missing.jpg",
            &part,
            &quick_policy(),
            &no_retry(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::Api {
                source: ApiError::HttpStatus { status: 404, .. },
                ..
            }
        ));
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_cancelled_download_removes_part() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new();
        api.add_file("https://cdn.test/a.jpg", b"data");
        let part = dir.path().join(".a.jpg.part");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = download_file(
            &api,
            "https://cdn.test/a.jpg",
            &part,
            &quick_policy(),
            &no_retry(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::Cancelled));
        assert!(!part.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_rate_limit_backoff_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::new();
        for _ in 0..20 {
            api.push_download_error(ApiError::RateLimited { url: "https://cdn.test/a.jpg".into() });
        }
        let part = dir.path().join(".a.jpg.part");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = download_file(
            &api,
            "https://cdn.test/a.jpg",
            &part,
            &quick_policy(),
            &no_retry(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_discard_part_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join(".gone.part");
        discard_part(&part).await;
        std::fs::write(&part, b"x").unwrap();
        discard_part(&part).await;
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_promote_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join(".x.part");
        std::fs::write(&part, b"x").unwrap();
        let target = dir.path().join("creator").join("Pictures").join("x.jpg");
        promote(&part, &target).await.unwrap();
        assert!(target.exists());
        assert!(!part.exists());
    }

    #[test]
    fn test_set_file_mtime_positive_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("mtime_pos.txt");
        std::fs::write(&p, b"x").unwrap();
        set_file_mtime(&p, 1_700_000_000).unwrap();
        let mtime = std::fs::metadata(&p).unwrap().modified().unwrap();
        assert_eq!(mtime, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    }

    #[test]
    fn test_set_file_mtime_nonexistent_file() {
        assert!(set_file_mtime(Path::new("/nonexistent/file.txt"), 0).is_err());
    }
}
