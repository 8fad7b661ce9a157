use thiserror::Error;

/// Errors surfaced by the remote API collaborator.
///
/// Rate limiting is its own variant so the request wrapper can retry it
/// without retrying anything else.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limited by remote API ({url})")]
    RateLimited { url: String },

    #[error("Not authorized for {url} (status {status}); not following this creator, or token invalid")]
    Unauthorized { status: u16, url: String },

    #[error("HTTP error {status} requesting {url}")]
    HttpStatus { status: u16, url: String },

    #[error("API reported failure for {url}")]
    Unsuccessful { url: String },

    #[error("Creator '{0}' not found")]
    CreatorNotFound(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request abandoned for shutdown")]
    Cancelled,
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Classify a non-success HTTP status.
    pub(crate) fn from_status(status: u16, url: &str) -> Self {
        match status {
            429 => ApiError::RateLimited {
                url: url.to_string(),
            },
            401 | 403 => ApiError::Unauthorized {
                status,
                url: url.to_string(),
            },
            _ => ApiError::HttpStatus {
                status,
                url: url.to_string(),
            },
        }
    }
}
