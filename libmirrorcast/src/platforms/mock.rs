//! Recording platform doubles for testing
//!
//! [`MockSource`] and [`MockDestination`] are cheap-to-clone handles over
//! shared state, so a test can keep one handle for assertions while the
//! engine owns another. They simulate the tolerated and fatal failure modes
//! of the real clients without network access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{PlatformError, Result};
use crate::platforms::{DestinationPlatform, SourcePlatform};
use crate::types::{
    DestinationPost, InstanceMetadata, MediaHandle, ProfileUpdate, SourcePost, SourceProfile,
    SubmissionPayload,
};

/// Version string reported by a Pleroma-family mock instance
pub const PLEROMA_VERSION: &str = "2.7.2 (compatible; Pleroma 2.5.0)";

/// Version string reported by a Mastodon mock instance
pub const MASTODON_VERSION: &str = "4.2.1";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn upstream(context: &str, status: u16) -> PlatformError {
    PlatformError::Upstream {
        platform: "mock".to_string(),
        context: context.to_string(),
        status,
        body: "mock failure".to_string(),
    }
}

// ============================================================================
// Source
// ============================================================================

#[derive(Default)]
struct SourceState {
    posts: Vec<SourcePost>,
    pinned: Option<String>,
    media: HashMap<String, Vec<u8>>,
    failing_media: HashMap<String, u16>,
    profile: SourceProfile,
    list_calls: Vec<(DateTime<Utc>, u8)>,
    get_calls: Vec<String>,
    download_calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockSource {
    state: Arc<Mutex<SourceState>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(posts: Vec<SourcePost>) -> Self {
        let source = Self::new();
        lock(&source.state).posts = posts;
        source
    }

    /// A post published after the source was built
    pub fn add_post(&self, post: SourcePost) {
        lock(&self.state).posts.push(post);
    }

    pub fn set_pinned(&self, id: Option<&str>) {
        lock(&self.state).pinned = id.map(str::to_string);
    }

    /// Serve `bytes` for downloads of `url`
    pub fn add_media(&self, url: &str, bytes: Vec<u8>) {
        lock(&self.state).media.insert(url.to_string(), bytes);
    }

    /// Answer downloads of `url` with an HTTP error
    pub fn fail_media(&self, url: &str, status: u16) {
        lock(&self.state).failing_media.insert(url.to_string(), status);
    }

    pub fn set_profile(&self, profile: SourceProfile) {
        lock(&self.state).profile = profile;
    }

    /// `(since, max_count)` of every `list_posts` call
    pub fn list_calls(&self) -> Vec<(DateTime<Utc>, u8)> {
        lock(&self.state).list_calls.clone()
    }

    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.state).get_calls.clone()
    }

    pub fn download_calls(&self) -> Vec<String> {
        lock(&self.state).download_calls.clone()
    }
}

#[async_trait]
impl SourcePlatform for MockSource {
    fn name(&self) -> &str {
        "mock-source"
    }

    async fn list_posts(&self, since: DateTime<Utc>, max_count: u8) -> Result<Vec<SourcePost>> {
        let mut state = lock(&self.state);
        state.list_calls.push((since, max_count));

        // Newest first, like the real timeline
        let mut posts: Vec<SourcePost> = state
            .posts
            .iter()
            .filter(|p| p.created_at >= since)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.chronological_key().cmp(&a.chronological_key()));
        Ok(posts)
    }

    async fn get_post(&self, id: &str) -> Result<SourcePost> {
        let mut state = lock(&self.state);
        state.get_calls.push(id.to_string());

        state
            .posts
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| upstream("get post", 404).into())
    }

    async fn pinned_post_id(&self) -> Result<Option<String>> {
        Ok(lock(&self.state).pinned.clone())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut state = lock(&self.state);
        state.download_calls.push(url.to_string());

        if let Some(status) = state.failing_media.get(url) {
            return Err(upstream("download media", *status).into());
        }
        Ok(state.media.get(url).cloned().unwrap_or_else(|| b"mock-bytes".to_vec()))
    }

    async fn profile(&self) -> Result<SourceProfile> {
        Ok(lock(&self.state).profile.clone())
    }
}

// ============================================================================
// Destination
// ============================================================================

/// How the mock answers one upload call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadBehavior {
    Accept,
    /// HTTP 413
    TooLarge,
    /// 2xx with a body that has no media id
    Unparseable,
    /// HTTP 500
    ServerError,
}

/// One recorded upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub filename: String,
    pub mime: String,
    pub size: usize,
}

struct DestinationState {
    version: Option<String>,
    history: Vec<DestinationPost>,
    submitted: Vec<SubmissionPayload>,
    uploads: Vec<RecordedUpload>,
    upload_plan: VecDeque<UploadBehavior>,
    fail_submissions_from: Option<usize>,
    pins: Vec<String>,
    unpins: Vec<String>,
    fail_pin: bool,
    profile_updates: Vec<ProfileUpdate>,
    next_media_id: usize,
}

#[derive(Clone)]
pub struct MockDestination {
    state: Arc<Mutex<DestinationState>>,
}

impl Default for MockDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDestination {
    /// A Pleroma-family destination with no history that accepts everything
    pub fn new() -> Self {
        Self::with_version(PLEROMA_VERSION)
    }

    pub fn with_version(version: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(DestinationState {
                version: Some(version.to_string()),
                history: Vec::new(),
                submitted: Vec::new(),
                uploads: Vec::new(),
                upload_plan: VecDeque::new(),
                fail_submissions_from: None,
                pins: Vec::new(),
                unpins: Vec::new(),
                fail_pin: false,
                profile_updates: Vec::new(),
                next_media_id: 0,
            })),
        }
    }

    /// Instance metadata without a version field
    pub fn without_version(self) -> Self {
        lock(&self.state).version = None;
        self
    }

    /// Seed the account with an existing status
    pub fn add_history(&self, id: &str, created_at: DateTime<Utc>) {
        let post = DestinationPost {
            id: id.to_string(),
            created_at,
            content: String::new(),
            visibility: None,
            sensitive: false,
            media_ids: Vec::new(),
            has_poll: false,
        };
        let mut state = lock(&self.state);
        state.history.push(post);
        state.history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    /// Behaviors for the next upload calls, in order; later calls accept
    pub fn plan_uploads(&self, plan: &[UploadBehavior]) {
        lock(&self.state).upload_plan.extend(plan.iter().copied());
    }

    /// Every submission from the `index`-th (0-based) onward fails with HTTP 500
    pub fn fail_submissions_from(&self, index: usize) {
        lock(&self.state).fail_submissions_from = Some(index);
    }

    pub fn fail_pins(&self) {
        lock(&self.state).fail_pin = true;
    }

    pub fn submitted(&self) -> Vec<SubmissionPayload> {
        lock(&self.state).submitted.clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        lock(&self.state).uploads.clone()
    }

    pub fn pin_calls(&self) -> Vec<String> {
        lock(&self.state).pins.clone()
    }

    pub fn unpin_calls(&self) -> Vec<String> {
        lock(&self.state).unpins.clone()
    }

    pub fn profile_updates(&self) -> Vec<ProfileUpdate> {
        lock(&self.state).profile_updates.clone()
    }
}

#[async_trait]
impl DestinationPlatform for MockDestination {
    fn name(&self) -> &str {
        "mock-destination"
    }

    async fn account_history(&self) -> Result<Vec<DestinationPost>> {
        Ok(lock(&self.state).history.clone())
    }

    async fn upload_media(&self, bytes: Vec<u8>, filename: &str, mime: &str) -> Result<MediaHandle> {
        let mut state = lock(&self.state);
        state.uploads.push(RecordedUpload {
            filename: filename.to_string(),
            mime: mime.to_string(),
            size: bytes.len(),
        });

        match state.upload_plan.pop_front().unwrap_or(UploadBehavior::Accept) {
            UploadBehavior::Accept => {
                state.next_media_id += 1;
                Ok(MediaHandle {
                    id: format!("media-{}", state.next_media_id),
                })
            }
            UploadBehavior::TooLarge => Err(upstream("upload media", 413).into()),
            UploadBehavior::Unparseable => {
                Err(PlatformError::Protocol("upload media: no id in <html>".to_string()).into())
            }
            UploadBehavior::ServerError => Err(upstream("upload media", 500).into()),
        }
    }

    async fn submit_post(&self, payload: &SubmissionPayload) -> Result<DestinationPost> {
        let mut state = lock(&self.state);
        let index = state.submitted.len();
        state.submitted.push(payload.clone());

        if matches!(state.fail_submissions_from, Some(from) if index >= from) {
            return Err(upstream("submit post", 500).into());
        }

        let post = DestinationPost {
            id: format!("dest-{}", index + 1),
            created_at: Utc::now(),
            content: payload.status.clone(),
            visibility: Some(payload.visibility),
            sensitive: payload.sensitive,
            media_ids: payload.media_ids.clone(),
            has_poll: payload.poll.is_some(),
        };
        state.history.insert(0, post.clone());
        Ok(post)
    }

    async fn pin(&self, post_id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.pins.push(post_id.to_string());
        if state.fail_pin {
            return Err(upstream("pin", 422).into());
        }
        Ok(())
    }

    async fn unpin(&self, post_id: &str) -> Result<()> {
        lock(&self.state).unpins.push(post_id.to_string());
        Ok(())
    }

    async fn instance_metadata(&self) -> Result<InstanceMetadata> {
        match &lock(&self.state).version {
            Some(version) => Ok(InstanceMetadata {
                version: version.clone(),
                title: Some("Mock instance".to_string()),
            }),
            None => Err(PlatformError::Protocol("instance metadata: missing field `version`".to_string()).into()),
        }
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<()> {
        lock(&self.state).profile_updates.push(update.clone());
        Ok(())
    }
}
