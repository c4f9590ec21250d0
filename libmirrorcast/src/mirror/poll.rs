//! Poll transcription

use crate::types::{Poll, PollPayload};

/// Convert a source poll into the destination's shape.
///
/// Returns `None` without a poll, or when the poll cannot be represented
/// (fewer than two options, a blank option, no duration). The post is still
/// submitted in that case.
pub fn transcribe(poll: Option<&Poll>) -> Option<PollPayload> {
    let poll = poll?;

    if poll.options.len() < 2 {
        tracing::warn!(options = poll.options.len(), "Poll needs at least two options, omitting it");
        return None;
    }
    if poll.options.iter().any(|o| o.trim().is_empty()) {
        tracing::warn!("Poll has an empty option, omitting it");
        return None;
    }
    if poll.duration_minutes == 0 {
        tracing::warn!("Poll has no duration, omitting it");
        return None;
    }

    Some(PollPayload {
        options: poll.options.clone(),
        expires_in: u64::from(poll.duration_minutes) * 60,
    })
}
