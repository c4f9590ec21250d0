//! Media transfer between source storage and destination uploads

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::error::{MirrorError, PlatformError, Result};
use crate::platforms::{DestinationPlatform, SourcePlatform};
use crate::types::{Attachment, MediaHandle, MediaKind, MediaMimeType};

/// Prefix of every uploaded file name
pub const UPLOAD_PREFIX: &str = "mirrorcastupload";

const OCTET_STREAM: &str = "application/octet-stream";
const SUFFIX_LEN: usize = 10;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const BYTES_PER_MB: f64 = 1_048_576.0;

/// Why an attachment was left off a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFailure {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded(MediaHandle),
    Dropped(AttachmentFailure),
}

/// Detect a media type from its leading bytes
pub fn sniff_mime(data: &[u8]) -> Option<MediaMimeType> {
    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(MediaMimeType::Png);
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(MediaMimeType::Jpeg);
    }

    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some(MediaMimeType::Gif);
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some(MediaMimeType::WebP);
    }

    // ISO base media: ....ftyp<brand>
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return Some(if &data[8..12] == b"qt  " {
            MediaMimeType::QuickTime
        } else {
            MediaMimeType::Mp4
        });
    }

    // Matroska/WebM EBML header
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(MediaMimeType::WebM);
    }

    let head = String::from_utf8_lossy(&data[..data.len().min(512)]);
    let head = head.trim_start();
    if (head.starts_with("<svg") || head.starts_with("<?xml")) && head.contains("<svg") {
        return Some(MediaMimeType::Svg);
    }

    None
}

/// Extension of the last path segment of a URL, ignoring query and fragment
pub fn url_extension(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let segment = url.path_segments()?.last()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

/// MIME string and file extension for an attachment's bytes.
///
/// Sniffing wins; then the URL extension; then the declared kind.
pub fn classify(data: &[u8], url: &str, kind: MediaKind) -> (String, String) {
    if let Some(mime) = sniff_mime(data) {
        return (mime.as_str().to_string(), mime.extension().to_string());
    }

    if let Some(mime) = url_extension(url).and_then(|ext| MediaMimeType::from_extension(&ext)) {
        return (mime.as_str().to_string(), mime.extension().to_string());
    }

    match kind.fallback_mime() {
        Some(mime) => (mime.as_str().to_string(), mime.extension().to_string()),
        None => (OCTET_STREAM.to_string(), "bin".to_string()),
    }
}

/// Microseconds since the epoch, strictly increasing within this process
fn monotonic_micros() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
    let previous = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// `mirrorcastupload_{µs}_{10 random [a-z0-9]}.{ext}`
pub fn upload_filename(extension: &str) -> String {
    format!(
        "{}_{}_{}.{}",
        UPLOAD_PREFIX,
        monotonic_micros(),
        random_suffix(),
        extension
    )
}

/// Moves attachments from the source to the destination, one at a time
pub struct MediaTransfer<'a> {
    source: &'a dyn SourcePlatform,
    destination: &'a dyn DestinationPlatform,
}

impl<'a> MediaTransfer<'a> {
    pub fn new(source: &'a dyn SourcePlatform, destination: &'a dyn DestinationPlatform) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Transfer one attachment.
    ///
    /// Download failures and unexpected upload errors are returned as errors.
    /// A 413 or an upload response without a media id drops the attachment.
    pub async fn transfer(&self, attachment: &Attachment) -> Result<TransferOutcome> {
        let bytes = self.source.download(&attachment.url).await?;
        let size = bytes.len();
        let (mime, extension) = classify(&bytes, &attachment.url, attachment.kind);
        let filename = upload_filename(&extension);

        tracing::debug!(url = %attachment.url, %filename, %mime, size, "Uploading attachment");

        match self.destination.upload_media(bytes, &filename, &mime).await {
            Ok(handle) => Ok(TransferOutcome::Uploaded(handle)),
            Err(MirrorError::Platform(error)) if error.is_payload_too_large() => {
                let size_mb = format!("{:.2}", size as f64 / BYTES_PER_MB);
                tracing::warn!(
                    url = %attachment.url,
                    %filename,
                    size_mb = %size_mb,
                    "Media size too large: {} ({}MB). Consider increasing the attachment size limit of your instance",
                    filename,
                    size_mb
                );
                Ok(TransferOutcome::Dropped(AttachmentFailure {
                    url: attachment.url.clone(),
                    reason: format!("{} is too large ({}MB)", filename, size_mb),
                }))
            }
            Err(MirrorError::Platform(PlatformError::Protocol(reason))) => {
                tracing::warn!(url = %attachment.url, %reason, "Error uploading media, dropping attachment");
                Ok(TransferOutcome::Dropped(AttachmentFailure {
                    url: attachment.url.clone(),
                    reason,
                }))
            }
            Err(error) => Err(error),
        }
    }
}
