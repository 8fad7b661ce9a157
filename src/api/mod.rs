//! Remote feed API collaborator.
//!
//! The crawl pipeline only talks to [`FeedApi`]; [`ApiClient`] is the
//! `reqwest` implementation used by the binary. Every method surfaces HTTP 429
//! as [`ApiError::RateLimited`] so callers can wrap it in
//! [`crate::retry::call_rate_limited`].

pub mod error;
pub mod types;

pub use error::ApiError;
pub use types::{Creator, FeedPage, FeedPost, MediaAsset, MediaInfo, Wall};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::de::DeserializeOwned;

use types::Envelope;

/// Streamed response body of a media download.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

#[async_trait]
pub trait FeedApi: Send + Sync {
    /// Resolve a creator by username.
    async fn fetch_creator(&self, username: &str) -> Result<Creator, ApiError>;

    /// One timeline page strictly before `cursor` (`"0"` = newest).
    async fn fetch_timeline_page(&self, creator_id: &str, cursor: &str)
        -> Result<FeedPage, ApiError>;

    /// One wall page strictly before `cursor`.
    async fn fetch_wall_page(
        &self,
        creator_id: &str,
        wall_id: &str,
        cursor: &str,
    ) -> Result<FeedPage, ApiError>;

    /// Metadata for a batch of media ids. Unknown ids are omitted.
    async fn fetch_media_batch(&self, ids: &[String]) -> Result<Vec<MediaInfo>, ApiError>;

    /// Stream the bytes behind a download URL.
    async fn download(&self, url: &str) -> Result<ByteStream, ApiError>;

    /// Fetch a small text document such as a playlist.
    async fn fetch_text(&self, url: &str) -> Result<String, ApiError>;
}

/// `reqwest`-backed API client.
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str, user_agent: &str) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .header(AUTHORIZATION, &self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &url));
        }

        let body = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)?;
        match envelope.response {
            Some(inner) if envelope.success => Ok(inner),
            _ => Err(ApiError::Unsuccessful { url }),
        }
    }

    async fn get_raw(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), url));
        }
        Ok(response)
    }
}

#[async_trait]
impl FeedApi for ApiClient {
    async fn fetch_creator(&self, username: &str) -> Result<Creator, ApiError> {
        let creators: Vec<Creator> = self
            .get_envelope("/api/v1/account", &[("usernames", username)])
            .await?;
        creators
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::CreatorNotFound(username.to_string()))
    }

    async fn fetch_timeline_page(
        &self,
        creator_id: &str,
        cursor: &str,
    ) -> Result<FeedPage, ApiError> {
        self.get_envelope(
            &format!("/api/v1/timelinenew/{}", creator_id),
            &[("before", cursor), ("after", "0"), ("wallId", "")],
        )
        .await
    }

    async fn fetch_wall_page(
        &self,
        creator_id: &str,
        wall_id: &str,
        cursor: &str,
    ) -> Result<FeedPage, ApiError> {
        self.get_envelope(
            &format!("/api/v1/timelinenew/{}", creator_id),
            &[("before", cursor), ("after", "0"), ("wallId", wall_id)],
        )
        .await
    }

    async fn fetch_media_batch(&self, ids: &[String]) -> Result<Vec<MediaInfo>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        self.get_envelope("/api/v1/account/media", &[("ids", joined.as_str())])
            .await
    }

    async fn download(&self, url: &str) -> Result<ByteStream, ApiError> {
        let response = self.get_raw(url).await?;
        Ok(response.bytes_stream().map_err(ApiError::from).boxed())
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ApiError> {
        let response = self.get_raw(url).await?;
        Ok(response.text().await?)
    }
}
