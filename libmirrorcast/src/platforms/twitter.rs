//! Twitter source client (API v2, with v1.1 for profile images)

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::OnceCell;

use crate::config::AccountSettings;
use crate::error::{PlatformError, Result};
use crate::platforms::{build_http_client, ensure_success, read_json, transport_error, SourcePlatform};
use crate::types::{Attachment, MediaKind, Poll, SourcePost, SourceProfile};

const PLATFORM: &str = "twitter";

/// Largest page the timeline endpoint accepts
const MAX_PAGE_SIZE: u8 = 100;

const TWEET_FIELDS: &str = "created_at,possibly_sensitive,attachments,entities";
const EXPANSIONS: &str = "attachments.media_keys,attachments.poll_ids";
const MEDIA_FIELDS: &str = "type,url,variants";
const POLL_FIELDS: &str = "options,duration_minutes";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: UserData,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
    #[serde(default)]
    pinned_tweet_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimelinePage {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Deserialize)]
struct SingleTweet {
    data: Tweet,
    #[serde(default)]
    includes: Includes,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    possibly_sensitive: bool,
    #[serde(default)]
    attachments: Option<TweetAttachments>,
    #[serde(default)]
    entities: Option<Entities>,
}

#[derive(Debug, Default, Deserialize)]
struct TweetAttachments {
    #[serde(default)]
    media_keys: Vec<String>,
    #[serde(default)]
    poll_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Entities {
    #[serde(default)]
    urls: Vec<UrlEntity>,
}

#[derive(Debug, Deserialize)]
struct UrlEntity {
    url: String,
    #[serde(default)]
    expanded_url: Option<String>,
    #[serde(default)]
    media_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    media: Vec<Media>,
    #[serde(default)]
    polls: Vec<TweetPoll>,
}

#[derive(Debug, Deserialize)]
struct Media {
    media_key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    variants: Vec<MediaVariant>,
}

#[derive(Debug, Deserialize)]
struct MediaVariant {
    #[serde(default)]
    bit_rate: Option<u64>,
    content_type: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TweetPoll {
    id: String,
    options: Vec<PollOption>,
    duration_minutes: u32,
}

#[derive(Debug, Deserialize)]
struct PollOption {
    position: u32,
    label: String,
}

#[derive(Debug, Deserialize)]
struct LegacyUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    profile_image_url_https: Option<String>,
    #[serde(default)]
    profile_banner_url: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

pub struct TwitterClient {
    http: reqwest::Client,
    api_base: String,
    v1_base: String,
    username: String,
    token: SecretString,
    include_replies: bool,
    include_retweets: bool,
    user_id: OnceCell<String>,
}

impl TwitterClient {
    pub fn new(settings: &AccountSettings) -> Result<Self> {
        let http = build_http_client(settings.request_timeout, &settings.user_agent)?;

        Ok(Self {
            http,
            api_base: settings.twitter_api_base.as_str().trim_end_matches('/').to_string(),
            v1_base: settings.twitter_v1_base.as_str().trim_end_matches('/').to_string(),
            username: settings.source_username.clone(),
            token: SecretString::from(settings.source_token.expose_secret().to_string()),
            include_replies: settings.include_replies,
            include_retweets: settings.include_retweets,
            user_id: OnceCell::new(),
        })
    }

    /// Client pointed at arbitrary base URLs, for tests against a mock server
    pub fn with_base_urls(username: &str, token: &str, api_base: &str, v1_base: &str) -> Result<Self> {
        Ok(Self {
            http: build_http_client(std::time::Duration::from_secs(10), "mirrorcast-test")?,
            api_base: api_base.trim_end_matches('/').to_string(),
            v1_base: v1_base.trim_end_matches('/').to_string(),
            username: username.to_string(),
            token: SecretString::from(token.to_string()),
            include_replies: false,
            include_retweets: false,
            user_id: OnceCell::new(),
        })
    }

    async fn get(&self, context: &str, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        ensure_success(PLATFORM, context, response).await
    }

    async fn lookup_user(&self) -> Result<UserData> {
        let url = format!("{}/users/by/username/{}", self.api_base, self.username);
        let response = self
            .get(
                "user lookup",
                &url,
                &[("user.fields", "pinned_tweet_id".to_string())],
            )
            .await?;
        let envelope: UserEnvelope = read_json("user lookup", response).await?;
        Ok(envelope.data)
    }

    async fn user_id(&self) -> Result<&str> {
        let id = self
            .user_id
            .get_or_try_init(|| async { self.lookup_user().await.map(|user| user.id) })
            .await?;
        Ok(id.as_str())
    }

    fn exclude_param(&self) -> Option<String> {
        let mut excluded = Vec::new();
        if !self.include_replies {
            excluded.push("replies");
        }
        if !self.include_retweets {
            excluded.push("retweets");
        }
        if excluded.is_empty() {
            None
        } else {
            Some(excluded.join(","))
        }
    }

    fn field_params() -> Vec<(&'static str, String)> {
        vec![
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("expansions", EXPANSIONS.to_string()),
            ("media.fields", MEDIA_FIELDS.to_string()),
            ("poll.fields", POLL_FIELDS.to_string()),
        ]
    }
}

#[async_trait]
impl SourcePlatform for TwitterClient {
    fn name(&self) -> &str {
        PLATFORM
    }

    async fn list_posts(&self, since: DateTime<Utc>, max_count: u8) -> Result<Vec<SourcePost>> {
        let user_id = self.user_id().await?;
        let url = format!("{}/users/{}/tweets", self.api_base, user_id);

        let mut posts = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = Self::field_params();
            query.push(("start_time", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
            query.push(("max_results", max_count.min(MAX_PAGE_SIZE).to_string()));
            if let Some(exclude) = self.exclude_param() {
                query.push(("exclude", exclude));
            }
            if let Some(token) = &next_token {
                query.push(("pagination_token", token.clone()));
            }

            let response = self.get("list tweets", &url, &query).await?;
            let page: TimelinePage = read_json("list tweets", response).await?;

            let index = IncludeIndex::new(&page.includes);
            posts.extend(page.data.iter().map(|tweet| convert_tweet(tweet, &index)));

            tracing::debug!(fetched = posts.len(), "Fetched timeline page");

            match page.meta.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(posts)
    }

    async fn get_post(&self, id: &str) -> Result<SourcePost> {
        let url = format!("{}/tweets/{}", self.api_base, id);
        let response = self.get("get tweet", &url, &Self::field_params()).await?;
        let single: SingleTweet = read_json("get tweet", response).await?;

        let index = IncludeIndex::new(&single.includes);
        Ok(convert_tweet(&single.data, &index))
    }

    async fn pinned_post_id(&self) -> Result<Option<String>> {
        let user = self.lookup_user().await?;
        // Prime the id cache; a no-op once set
        let _ = self.user_id.set(user.id);
        Ok(user.pinned_tweet_id.filter(|id| !id.is_empty()))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        // Media CDNs are public; the bearer token stays with the API host
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let response = ensure_success(PLATFORM, "download media", response).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn profile(&self) -> Result<SourceProfile> {
        let url = format!("{}/users/show.json", self.v1_base);
        let response = self
            .get("user profile", &url, &[("screen_name", self.username.clone())])
            .await?;
        let user: LegacyUser = read_json("user profile", response).await?;

        Ok(SourceProfile {
            display_name: user.name,
            description: user.description.unwrap_or_default(),
            avatar_url: user.profile_image_url_https.as_deref().map(original_avatar_url),
            banner_url: user.profile_banner_url,
        })
    }
}

// ============================================================================
// Conversion
// ============================================================================

struct IncludeIndex<'a> {
    media: HashMap<&'a str, &'a Media>,
    polls: HashMap<&'a str, &'a TweetPoll>,
}

impl<'a> IncludeIndex<'a> {
    fn new(includes: &'a Includes) -> Self {
        Self {
            media: includes.media.iter().map(|m| (m.media_key.as_str(), m)).collect(),
            polls: includes.polls.iter().map(|p| (p.id.as_str(), p)).collect(),
        }
    }
}

fn convert_tweet(tweet: &Tweet, index: &IncludeIndex<'_>) -> SourcePost {
    let default_attachments = TweetAttachments::default();
    let attachments = tweet.attachments.as_ref().unwrap_or(&default_attachments);

    let media = attachments
        .media_keys
        .iter()
        .filter_map(|key| match index.media.get(key.as_str()) {
            Some(media) => media_attachment(media),
            None => {
                tracing::warn!(tweet_id = %tweet.id, media_key = %key, "Media key missing from includes");
                None
            }
        })
        .collect();

    let poll = attachments
        .poll_ids
        .first()
        .and_then(|id| index.polls.get(id.as_str()))
        .map(|poll| {
            let mut options: Vec<&PollOption> = poll.options.iter().collect();
            options.sort_by_key(|o| o.position);
            Poll {
                options: options.into_iter().map(|o| o.label.clone()).collect(),
                duration_minutes: poll.duration_minutes,
            }
        });

    SourcePost {
        id: tweet.id.clone(),
        created_at: tweet.created_at,
        text: clean_text(&tweet.text, tweet.entities.as_ref()),
        attachments: media,
        poll,
        sensitive: tweet.possibly_sensitive,
    }
}

/// Photos link to their image; videos and GIFs to the best MP4 variant
fn media_attachment(media: &Media) -> Option<Attachment> {
    let kind = MediaKind::from_source_type(&media.kind);
    let url = match kind {
        MediaKind::Image => media.url.clone(),
        _ => media
            .variants
            .iter()
            .filter(|v| v.content_type == "video/mp4")
            .max_by_key(|v| v.bit_rate.unwrap_or(0))
            .map(|v| v.url.clone())
            .or_else(|| media.url.clone()),
    }?;

    Some(Attachment::new(url, kind))
}

/// `.../name_normal.jpg` is the 48px thumbnail; `.../name.jpg` the original
fn original_avatar_url(url: &str) -> String {
    let segment_start = url.rfind('/').map_or(0, |i| i + 1);
    let segment = &url[segment_start..];
    let stem_end = segment.rfind('.').unwrap_or(segment.len());

    match segment[..stem_end].strip_suffix("_normal") {
        Some(stem) => format!("{}{}{}", &url[..segment_start], stem, &segment[stem_end..]),
        None => url.to_string(),
    }
}

/// Expand t.co links, drop media links and decode the entities Twitter escapes
fn clean_text(text: &str, entities: Option<&Entities>) -> String {
    let mut cleaned = text.to_string();

    if let Some(entities) = entities {
        for entity in &entities.urls {
            let is_media_link = entity.media_key.is_some()
                || entity
                    .expanded_url
                    .as_deref()
                    .map(|u| u.contains("/photo/") || u.contains("/video/"))
                    .unwrap_or(false);

            let replacement = if is_media_link {
                ""
            } else {
                entity.expanded_url.as_deref().unwrap_or(&entity.url)
            };
            cleaned = cleaned.replace(&entity.url, replacement);
        }
    }

    cleaned
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> TwitterClient {
        TwitterClient::with_base_urls(
            "alice",
            "bearer-token",
            &format!("{}/2", server.uri()),
            &format!("{}/1.1", server.uri()),
        )
        .unwrap()
    }

    async fn mount_user(server: &MockServer, pinned: Option<&str>) {
        let mut data = serde_json::json!({"id": "42", "name": "Alice", "username": "alice"});
        if let Some(pinned) = pinned {
            data["pinned_tweet_id"] = serde_json::json!(pinned);
        }
        Mock::given(method("GET"))
            .and(path("/2/users/by/username/alice"))
            .and(header("authorization", "Bearer bearer-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_clean_text_expands_links_and_drops_media_links() {
        let entities = Entities {
            urls: vec![
                UrlEntity {
                    url: "https://t.co/abc".to_string(),
                    expanded_url: Some("https://example.org/article".to_string()),
                    media_key: None,
                },
                UrlEntity {
                    url: "https://t.co/pic".to_string(),
                    expanded_url: Some("https://twitter.com/alice/status/1/photo/1".to_string()),
                    media_key: Some("3_1".to_string()),
                },
            ],
        };

        let cleaned = clean_text(
            "Read https://t.co/abc &amp; enjoy https://t.co/pic",
            Some(&entities),
        );
        assert_eq!(cleaned, "Read https://example.org/article & enjoy");
    }

    #[test]
    fn test_media_attachment_picks_highest_bitrate_mp4() {
        let media = Media {
            media_key: "7_1".to_string(),
            kind: "video".to_string(),
            url: None,
            variants: vec![
                MediaVariant {
                    bit_rate: Some(256_000),
                    content_type: "video/mp4".to_string(),
                    url: "https://video.twimg.com/low.mp4".to_string(),
                },
                MediaVariant {
                    bit_rate: None,
                    content_type: "application/x-mpegURL".to_string(),
                    url: "https://video.twimg.com/pl.m3u8".to_string(),
                },
                MediaVariant {
                    bit_rate: Some(2_176_000),
                    content_type: "video/mp4".to_string(),
                    url: "https://video.twimg.com/high.mp4".to_string(),
                },
            ],
        };

        let attachment = media_attachment(&media).unwrap();
        assert_eq!(attachment.kind, MediaKind::Video);
        assert_eq!(attachment.url, "https://video.twimg.com/high.mp4");
    }

    #[tokio::test]
    async fn test_list_posts_maps_media_poll_and_pages() {
        let server = MockServer::start().await;
        mount_user(&server, None).await;

        Mock::given(method("GET"))
            .and(path("/2/users/42/tweets"))
            .and(query_param("pagination_token", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "101", "text": "older", "created_at": "2024-05-01T10:00:00.000Z"}
                ],
                "meta": {"result_count": 1}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/2/users/42/tweets"))
            .and(query_param("start_time", "2024-05-01T00:00:00Z"))
            .and(query_param("exclude", "replies,retweets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {
                        "id": "102",
                        "text": "look https://t.co/x",
                        "created_at": "2024-05-01T11:00:00.000Z",
                        "possibly_sensitive": true,
                        "attachments": {"media_keys": ["3_1"], "poll_ids": ["p1"]},
                        "entities": {"urls": [{"url": "https://t.co/x", "expanded_url": "https://twitter.com/alice/status/102/photo/1", "media_key": "3_1"}]}
                    }
                ],
                "includes": {
                    "media": [{"media_key": "3_1", "type": "photo", "url": "https://pbs.twimg.com/media/a.jpg"}],
                    "polls": [{"id": "p1", "duration_minutes": 60, "options": [
                        {"position": 2, "label": "no", "votes": 0},
                        {"position": 1, "label": "yes", "votes": 0}
                    ]}]
                },
                "meta": {"result_count": 1, "next_token": "page2"}
            })))
            .mount(&server)
            .await;

        let since = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let posts = client(&server).await.list_posts(since, 10).await.unwrap();

        assert_eq!(posts.len(), 2);
        let first = &posts[0];
        assert_eq!(first.id, "102");
        assert_eq!(first.text, "look");
        assert!(first.sensitive);
        assert_eq!(first.attachments.len(), 1);
        assert_eq!(first.attachments[0].url, "https://pbs.twimg.com/media/a.jpg");
        let poll = first.poll.as_ref().unwrap();
        assert_eq!(poll.options, vec!["yes", "no"]);
        assert_eq!(poll.duration_minutes, 60);
        assert_eq!(posts[1].id, "101");
    }

    #[test]
    fn test_original_avatar_url_only_touches_the_file_name() {
        assert_eq!(
            original_avatar_url("https://pbs.twimg.com/profile_images/1/a_normal.jpg"),
            "https://pbs.twimg.com/profile_images/1/a.jpg"
        );
        assert_eq!(
            original_avatar_url("https://cdn_normal.example/p_normal_x/me_normal.png"),
            "https://cdn_normal.example/p_normal_x/me.png"
        );
        assert_eq!(
            original_avatar_url("https://cdn.example/my_normal_life.png"),
            "https://cdn.example/my_normal_life.png"
        );
        assert_eq!(
            original_avatar_url("https://cdn.example/img/me_normal"),
            "https://cdn.example/img/me"
        );
    }

    fn timeline_page(ids: std::ops::RangeInclusive<u32>, next_token: Option<&str>) -> serde_json::Value {
        let data: Vec<serde_json::Value> = ids
            .rev()
            .map(|id| {
                serde_json::json!({
                    "id": id.to_string(),
                    "text": format!("post {}", id),
                    "created_at": format!("2024-05-01T10:{:02}:00.000Z", id),
                })
            })
            .collect();
        let mut meta = serde_json::json!({"result_count": data.len()});
        if let Some(token) = next_token {
            meta["next_token"] = serde_json::json!(token);
        }
        serde_json::json!({"data": data, "meta": meta})
    }

    #[tokio::test]
    async fn test_list_posts_follows_every_page_beyond_max_count() {
        let server = MockServer::start().await;
        mount_user(&server, None).await;

        Mock::given(method("GET"))
            .and(path("/2/users/42/tweets"))
            .and(query_param("pagination_token", "older"))
            .and(query_param("max_results", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(timeline_page(1..=10, None)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/2/users/42/tweets"))
            .and(query_param("max_results", "10"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(timeline_page(11..=20, Some("older"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let since = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let posts = client(&server).await.list_posts(since, 10).await.unwrap();

        let mut ids: Vec<u32> = posts.iter().map(|p| p.id.parse().unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pinned_post_id() {
        let server = MockServer::start().await;
        mount_user(&server, Some("555")).await;

        let pinned = client(&server).await.pinned_post_id().await.unwrap();
        assert_eq!(pinned, Some("555".to_string()));
    }

    #[tokio::test]
    async fn test_pinned_post_id_none() {
        let server = MockServer::start().await;
        mount_user(&server, None).await;

        assert_eq!(client(&server).await.pinned_post_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/users/by/username/alice"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let error = client(&server).await.pinned_post_id().await.unwrap_err();
        assert_eq!(error.upstream_status(), Some(401));
        assert!(error.to_string().contains("user lookup"));
    }

    #[tokio::test]
    async fn test_malformed_body_maps_to_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2/tweets/9"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let error = client(&server).await.get_post("9").await.unwrap_err();
        assert!(matches!(
            error,
            crate::error::MirrorError::Platform(PlatformError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_download_returns_bytes_and_maps_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let twitter = client(&server).await;
        let bytes = twitter
            .download(&format!("{}/media/a.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);

        let error = twitter
            .download(&format!("{}/media/gone.png", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(error.upstream_status(), Some(404));
    }

    #[tokio::test]
    async fn test_profile_uses_original_avatar_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.1/users/show.json"))
            .and(query_param("screen_name", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Alice",
                "description": "hello",
                "profile_image_url_https": "https://pbs.twimg.com/profile_images/1/a_normal.jpg",
                "profile_banner_url": "https://pbs.twimg.com/profile_banners/1/2"
            })))
            .mount(&server)
            .await;

        let profile = client(&server).await.profile().await.unwrap();
        assert_eq!(profile.display_name, "Alice");
        assert_eq!(profile.description, "hello");
        assert_eq!(
            profile.avatar_url.as_deref(),
            Some("https://pbs.twimg.com/profile_images/1/a.jpg")
        );
        assert!(profile.banner_url.is_some());
    }
}
