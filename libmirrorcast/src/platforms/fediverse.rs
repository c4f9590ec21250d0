//! Fediverse destination client (Mastodon-compatible REST API)
//!
//! Works against Pleroma, Akkoma and Mastodon. Statuses are submitted
//! form-encoded so that array parameters can be sent as repeated keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::config::AccountSettings;
use crate::error::{MirrorError, PlatformError, Result};
use crate::platforms::{
    build_http_client, ensure_success, read_json, transport_error, DestinationPlatform,
};
use crate::types::{
    DestinationPost, InstanceMetadata, MediaFile, MediaHandle, ProfileUpdate, SubmissionPayload,
};

const PLATFORM: &str = "fediverse";

/// Statuses requested when reading account history
const HISTORY_LIMIT: u32 = 40;

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    content: String,
    /// Servers add their own scopes ("local", "list"), so parse leniently
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    sensitive: bool,
    #[serde(default)]
    media_attachments: Vec<MediaAttachment>,
    #[serde(default)]
    poll: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MediaAttachment {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Instance {
    version: String,
    #[serde(default)]
    title: Option<String>,
}

impl From<Status> for DestinationPost {
    fn from(status: Status) -> Self {
        Self {
            id: status.id,
            created_at: status.created_at,
            content: status.content,
            visibility: status.visibility.and_then(|v| v.parse().ok()),
            sensitive: status.sensitive,
            media_ids: status.media_attachments.into_iter().map(|m| m.id).collect(),
            has_poll: status.poll.map(|p| !p.is_null()).unwrap_or(false),
        }
    }
}

pub struct FediverseClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    account_id: OnceCell<String>,
}

impl FediverseClient {
    pub fn new(settings: &AccountSettings) -> Result<Self> {
        Ok(Self {
            http: build_http_client(settings.request_timeout, &settings.user_agent)?,
            base_url: settings
                .destination_base_url
                .as_str()
                .trim_end_matches('/')
                .to_string(),
            token: SecretString::from(settings.destination_token.expose_secret().to_string()),
            account_id: OnceCell::new(),
        })
    }

    /// Client pointed at an arbitrary base URL, for tests against a mock server
    pub fn with_base_url(base_url: &str, token: &str) -> Result<Self> {
        Ok(Self {
            http: build_http_client(std::time::Duration::from_secs(10), "mirrorcast-test")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: SecretString::from(token.to_string()),
            account_id: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, context: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;

        ensure_success(PLATFORM, context, response).await
    }

    async fn account_id(&self) -> Result<&str> {
        let id = self
            .account_id
            .get_or_try_init(|| async {
                let request = self.http.get(self.url("/api/v1/accounts/verify_credentials"));
                let response = self.send("verify credentials", request).await?;
                let account: Account = read_json("verify credentials", response).await?;
                Ok::<_, MirrorError>(account.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn post_status_action(&self, post_id: &str, action: &str) -> Result<()> {
        let request = self
            .http
            .post(self.url(&format!("/api/v1/statuses/{}/{}", post_id, action)));
        self.send(action, request).await?;
        Ok(())
    }
}

fn file_part(file: &MediaFile) -> Result<Part> {
    Part::bytes(file.bytes.clone())
        .file_name(file.filename.clone())
        .mime_str(&file.mime)
        .map_err(|e| MirrorError::InvalidInput(format!("invalid MIME type '{}': {}", file.mime, e)))
}

#[async_trait]
impl DestinationPlatform for FediverseClient {
    fn name(&self) -> &str {
        PLATFORM
    }

    async fn account_history(&self) -> Result<Vec<DestinationPost>> {
        let account_id = self.account_id().await?;
        let request = self
            .http
            .get(self.url(&format!("/api/v1/accounts/{}/statuses", account_id)))
            .query(&[("limit", HISTORY_LIMIT)]);
        let response = self.send("account history", request).await?;
        let statuses: Vec<Status> = read_json("account history", response).await?;

        Ok(statuses.into_iter().map(DestinationPost::from).collect())
    }

    async fn upload_media(&self, bytes: Vec<u8>, filename: &str, mime: &str) -> Result<MediaHandle> {
        let part = file_part(&MediaFile {
            bytes,
            filename: filename.to_string(),
            mime: mime.to_string(),
        })?;
        let form = Form::new().part("file", part);

        let request = self.http.post(self.url("/api/v1/media")).multipart(form);
        let response = self.send("upload media", request).await?;

        let body = response.text().await.map_err(transport_error)?;
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Protocol(format!("upload media: {}: {}", e, body)))?;

        match value.get("id") {
            Some(serde_json::Value::String(id)) => Ok(MediaHandle { id: id.clone() }),
            Some(serde_json::Value::Number(id)) => Ok(MediaHandle { id: id.to_string() }),
            _ => Err(PlatformError::Protocol(format!("upload media: no id in {}", body)).into()),
        }
    }

    async fn submit_post(&self, payload: &SubmissionPayload) -> Result<DestinationPost> {
        let request = self
            .http
            .post(self.url("/api/v1/statuses"))
            .form(&payload.form_fields());
        let response = self.send("submit post", request).await?;
        let status: Status = read_json("submit post", response).await?;

        Ok(status.into())
    }

    async fn pin(&self, post_id: &str) -> Result<()> {
        self.post_status_action(post_id, "pin").await
    }

    async fn unpin(&self, post_id: &str) -> Result<()> {
        self.post_status_action(post_id, "unpin").await
    }

    async fn instance_metadata(&self) -> Result<InstanceMetadata> {
        // Public endpoint, no credentials
        let response = self
            .http
            .get(self.url("/api/v1/instance"))
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(PLATFORM, "instance metadata", response).await?;
        let instance: Instance = read_json("instance metadata", response).await?;

        Ok(InstanceMetadata {
            version: instance.version,
            title: instance.title,
        })
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<()> {
        let mut form = Form::new();
        if let Some(name) = &update.display_name {
            form = form.text("display_name", name.clone());
        }
        if let Some(note) = &update.note {
            form = form.text("note", note.clone());
        }
        if let Some(avatar) = &update.avatar {
            form = form.part("avatar", file_part(avatar)?);
        }
        if let Some(header) = &update.header {
            form = form.part("header", file_part(header)?);
        }

        let request = self
            .http
            .patch(self.url("/api/v1/accounts/update_credentials"))
            .multipart(form);
        self.send("update profile", request).await?;
        Ok(())
    }
}
