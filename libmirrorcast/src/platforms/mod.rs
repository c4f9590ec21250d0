//! Platform abstraction and implementations
//!
//! The mirror engine only talks to the two traits defined here. Concrete
//! clients live in [`twitter`] (source) and [`fediverse`] (destination);
//! [`mock`] provides recording doubles for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{PlatformError, Result};
use crate::types::{
    DestinationPost, InstanceMetadata, MediaHandle, ProfileUpdate, SourcePost, SourceProfile,
    SubmissionPayload,
};

pub mod fediverse;
pub mod twitter;

// Available outside tests so integration tests and downstream crates can use it
pub mod mock;

/// Longest upstream body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Read side: the account being mirrored from
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    /// Lowercase identifier used in logs and errors
    fn name(&self) -> &str;

    /// Every post created at or after `since`, in any order.
    ///
    /// `max_count` bounds each page request; all pages are followed.
    async fn list_posts(&self, since: DateTime<Utc>, max_count: u8) -> Result<Vec<SourcePost>>;

    /// A single post by id, used for pinned posts outside the fetch window
    async fn get_post(&self, id: &str) -> Result<SourcePost>;

    /// Id of the currently pinned post, if any
    async fn pinned_post_id(&self) -> Result<Option<String>>;

    /// Fetch raw bytes of a media URL
    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    async fn profile(&self) -> Result<SourceProfile>;
}

/// Write side: the federated account being mirrored to
#[async_trait]
pub trait DestinationPlatform: Send + Sync {
    fn name(&self) -> &str;

    /// Recent statuses of the destination account, newest first
    async fn account_history(&self) -> Result<Vec<DestinationPost>>;

    /// Upload one media file.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Upstream` with status 413 when the file is too large
    /// - `PlatformError::Protocol` when the response carries no media id
    async fn upload_media(&self, bytes: Vec<u8>, filename: &str, mime: &str) -> Result<MediaHandle>;

    async fn submit_post(&self, payload: &SubmissionPayload) -> Result<DestinationPost>;

    async fn pin(&self, post_id: &str) -> Result<()>;

    async fn unpin(&self, post_id: &str) -> Result<()>;

    async fn instance_metadata(&self) -> Result<InstanceMetadata>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<()>;
}

// ============================================================================
// Shared HTTP plumbing for the reqwest clients
// ============================================================================

/// Build the HTTP client used by both platform clients
pub(crate) fn build_http_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {}", e)).into())
}

/// Map a transport-level failure (DNS, TLS, timeout)
pub(crate) fn transport_error(error: reqwest::Error) -> PlatformError {
    PlatformError::Network(error.to_string())
}

/// Pass 2xx responses through, turn anything else into `PlatformError::Upstream`
pub(crate) async fn ensure_success(
    platform: &str,
    context: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Upstream {
        platform: platform.to_string(),
        context: context.to_string(),
        status: status.as_u16(),
        body: truncate_body(&body),
    }
    .into())
}

/// Decode a JSON body, reporting shape mismatches as `PlatformError::Protocol`
pub(crate) async fn read_json<T: DeserializeOwned>(
    context: &str,
    response: reqwest::Response,
) -> Result<T> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PlatformError::Protocol(format!("{}: {}", context, e)).into())
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}
