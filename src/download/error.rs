use thiserror::Error;

use crate::api::ApiError;
use crate::state::StateError;

/// Typed download errors enabling retry classification.
///
/// The `is_retryable()` method distinguishes transient failures (server
/// errors, dropped connections) from permanent ones (auth errors, missing
/// files, disk failures) so the retry loop can abort early.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Error downloading {path}: {source}")]
    Api { source: ApiError, path: String },

    #[error("Invalid playlist {url}: {reason}")]
    InvalidPlaylist { url: String, reason: String },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("Download cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Api { source, .. } => match source {
                ApiError::HttpStatus { status, .. } => *status >= 500,
                ApiError::Http(_) => true,
                ApiError::RateLimited { .. } => true,
                _ => false,
            },
            DownloadError::InvalidPlaylist { .. } => false,
            DownloadError::Disk(_) => false,
            DownloadError::Cancelled => false,
            DownloadError::Other(_) => false,
        }
    }
}

/// Why a single media item could not be saved.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Media {id} is not downloadable: {reason}")]
    InvalidItem { id: String, reason: &'static str },

    #[error("Chunked video {id} failed: {source}")]
    ChunkedVideo { id: String, source: DownloadError },

    #[error("Media {id} failed: {source}")]
    Download { id: String, source: DownloadError },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Save cancelled")]
    Cancelled,
}
