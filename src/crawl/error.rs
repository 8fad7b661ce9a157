use thiserror::Error;

use crate::api::ApiError;
use crate::state::StateError;

/// Errors that end a single feed. Termination signals such as a fully known
/// page are not errors; see [`super::paginator::FeedEnd`].
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Access denied: not following this creator, or token invalid ({0})")]
    Unauthorized(#[source] ApiError),

    #[error("Invalid feed payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Api(ApiError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl FeedError {
    /// Authentication failures stop the remaining creators too.
    pub fn stops_process(&self) -> bool {
        matches!(self, FeedError::Unauthorized(_))
    }
}

impl From<ApiError> for FeedError {
    fn from(e: ApiError) -> Self {
        if e.is_unauthorized() {
            FeedError::Unauthorized(e)
        } else {
            FeedError::Api(e)
        }
    }
}
