//! Core types for Mirrorcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Source side
// ============================================================================

/// Media kind as declared by the source platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Gif,
    Other,
}

impl MediaKind {
    /// Map a source media type string ("photo", "video", "animated_gif")
    pub fn from_source_type(s: &str) -> Self {
        match s {
            "photo" => Self::Image,
            "video" => Self::Video,
            "animated_gif" => Self::Gif,
            _ => Self::Other,
        }
    }

    /// MIME type to assume when neither sniffing nor the URL helps
    pub fn fallback_mime(&self) -> Option<MediaMimeType> {
        match self {
            Self::Image => Some(MediaMimeType::Jpeg),
            Self::Video | Self::Gif => Some(MediaMimeType::Mp4),
            Self::Other => None,
        }
    }
}

/// A media attachment on a source post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub kind: MediaKind,
    /// Known only after download for most sources
    pub byte_size: Option<u64>,
}

impl Attachment {
    pub fn new(url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            kind,
            byte_size: None,
        }
    }
}

/// A poll attached to a source post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    /// Option labels in display order
    pub options: Vec<String>,
    pub duration_minutes: u32,
}

/// A post fetched from the source account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourcePost {
    /// Platform-native id, kept as a string to preserve precision
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub poll: Option<Poll>,
    pub sensitive: bool,
}

impl SourcePost {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at,
            text: text.into(),
            attachments: Vec::new(),
            poll: None,
            sensitive: false,
        }
    }

    /// Chronological ordering key: creation time, then numeric id order.
    ///
    /// Ids are compared by length first so that "9" sorts before "10"
    /// without parsing snowflakes that may not fit in an integer type.
    pub fn chronological_key(&self) -> (DateTime<Utc>, usize, &str) {
        (self.created_at, self.id.len(), self.id.as_str())
    }
}

/// Profile metadata of the source account
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceProfile {
    pub display_name: String,
    pub description: String,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
}

// ============================================================================
// Destination side
// ============================================================================

/// Post visibility on the destination
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Direct => "direct",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            "direct" => Ok(Self::Direct),
            _ => Err(format!(
                "Visibility not supported! Values allowed are: public, unlisted, private and direct (got '{}')",
                s
            )),
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Poll in the destination's submission shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollPayload {
    pub options: Vec<String>,
    /// Seconds until the poll closes
    pub expires_in: u64,
}

/// Everything the destination needs to create one status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionPayload {
    pub status: String,
    pub sensitive: bool,
    pub visibility: Visibility,
    pub media_ids: Vec<String>,
    pub poll: Option<PollPayload>,
    /// Only set when rich text is both requested and supported
    pub content_type: Option<String>,
}

impl SubmissionPayload {
    /// Form-encoded fields for the statuses endpoint.
    ///
    /// Array parameters are repeated keys (`media_ids[]`, `poll[options][]`).
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("status", self.status.clone()),
            ("sensitive", self.sensitive.to_string()),
            ("visibility", self.visibility.as_str().to_string()),
        ];

        for media_id in &self.media_ids {
            fields.push(("media_ids[]", media_id.clone()));
        }

        if let Some(poll) = &self.poll {
            for option in &poll.options {
                fields.push(("poll[options][]", option.clone()));
            }
            fields.push(("poll[expires_in]", poll.expires_in.to_string()));
        }

        if let Some(content_type) = &self.content_type {
            fields.push(("content_type", content_type.clone()));
        }

        fields
    }
}

/// A post as it exists on the destination account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationPost {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub visibility: Option<Visibility>,
    pub sensitive: bool,
    pub media_ids: Vec<String>,
    pub has_poll: bool,
}

/// Handle of media uploaded to the destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaHandle {
    pub id: String,
}

/// Raw instance metadata reported by the destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub version: String,
    pub title: Option<String>,
}

/// In-memory file ready to be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime: String,
}

/// Profile fields to push to the destination; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub note: Option<String>,
    pub avatar: Option<MediaFile>,
    pub header: Option<MediaFile>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.note.is_none()
            && self.avatar.is_none()
            && self.header.is_none()
    }
}

// ============================================================================
// Persistent and per-run state
// ============================================================================

/// Pinned-post reconciliation state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PinState {
    #[default]
    Unpinned,
    Pinned {
        source_id: String,
        destination_id: String,
    },
}

impl PinState {
    /// Rebuild the state from its stored pair (empty string = null).
    ///
    /// A source id without a destination id cannot satisfy the pairing
    /// invariant, so it is read as `Unpinned` and re-derived on this run.
    pub fn from_stored(source_id: &str, destination_id: &str) -> Self {
        if source_id.is_empty() || destination_id.is_empty() {
            return Self::Unpinned;
        }
        Self::Pinned {
            source_id: source_id.to_string(),
            destination_id: destination_id.to_string(),
        }
    }

    /// Stored pair for this state
    pub fn to_stored(&self) -> (&str, &str) {
        match self {
            Self::Unpinned => ("", ""),
            Self::Pinned {
                source_id,
                destination_id,
            } => (source_id.as_str(), destination_id.as_str()),
        }
    }

    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::Unpinned => None,
            Self::Pinned { source_id, .. } => Some(source_id),
        }
    }
}

impl std::fmt::Display for PinState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpinned => write!(f, "unpinned"),
            Self::Pinned {
                source_id,
                destination_id,
            } => write!(f, "pinned({} -> {})", source_id, destination_id),
        }
    }
}

/// Time and count boundary for fetching new source posts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCursor {
    pub since: DateTime<Utc>,
    pub max_count: u8,
}

/// Persisted source → destination correspondence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdMapping {
    pub account: String,
    pub source_id: String,
    pub destination_id: String,
    pub mirrored_at: i64,
}

/// Persisted summary of one mirroring pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub id: String,
    pub account: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub mirrored: i64,
    pub skipped: i64,
    pub success: bool,
    pub error_message: Option<String>,
}

// ============================================================================
// Media types
// ============================================================================

/// MIME types the mirror knows how to label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
    Svg,
    Mp4,
    QuickTime,
    WebM,
}

impl MediaMimeType {
    /// Parse MIME type from a MIME string (e.g., "image/jpeg")
    pub fn from_mime_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            "image/svg+xml" => Some(Self::Svg),
            "video/mp4" => Some(Self::Mp4),
            "video/quicktime" => Some(Self::QuickTime),
            "video/webm" => Some(Self::WebM),
            _ => None,
        }
    }

    /// Detect MIME type from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            "svg" => Some(Self::Svg),
            "mp4" | "m4v" => Some(Self::Mp4),
            "mov" => Some(Self::QuickTime),
            "webm" => Some(Self::WebM),
            _ => None,
        }
    }

    /// Get the MIME type string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Svg => "image/svg+xml",
            Self::Mp4 => "video/mp4",
            Self::QuickTime => "video/quicktime",
            Self::WebM => "video/webm",
        }
    }

    /// Get the typical file extension for this MIME type
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
            Self::Svg => "svg",
            Self::Mp4 => "mp4",
            Self::QuickTime => "mov",
            Self::WebM => "webm",
        }
    }
}

impl std::fmt::Display for MediaMimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
