//! Source post → destination submission

use crate::mirror::capabilities::Capabilities;
use crate::types::{PollPayload, SourcePost, SubmissionPayload, Visibility};

pub const DEFAULT_RICH_TEXT_CONTENT_TYPE: &str = "text/markdown";

/// Per-account knobs that shape every submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    pub signature: bool,
    /// Rendered link base, e.g. `https://twitter.com/alice`
    pub source_url: String,
    pub visibility: Visibility,
    /// When set, replaces the post's own sensitivity flag
    pub sensitive_override: Option<bool>,
    pub rich_text: bool,
    pub content_type: String,
}

/// Back-link to the original post
pub fn signature_line(source_url: &str, post_id: &str) -> String {
    format!("🔗 {}/status/{}", source_url.trim_end_matches('/'), post_id)
}

/// Build the one submission for `post`. No I/O.
pub fn transform(
    post: &SourcePost,
    capabilities: &Capabilities,
    options: &TransformOptions,
    media_ids: Vec<String>,
    poll: Option<PollPayload>,
) -> SubmissionPayload {
    let status = if options.signature {
        let signature = signature_line(&options.source_url, &post.id);
        if post.text.is_empty() {
            signature
        } else {
            format!("{}\n\n{}", post.text, signature)
        }
    } else {
        post.text.clone()
    };

    let content_type = (options.rich_text && capabilities.supports_rich_text)
        .then(|| options.content_type.clone());

    SubmissionPayload {
        status,
        sensitive: options.sensitive_override.unwrap_or(post.sensitive),
        visibility: options.visibility,
        media_ids,
        poll,
        content_type,
    }
}
