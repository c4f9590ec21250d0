//! The mirroring pipeline: fetch, transform, transfer, submit, record

use serde::Serialize;

use crate::db::Database;
use crate::error::Result;
use crate::mirror::capabilities::Capabilities;
use crate::mirror::media::{AttachmentFailure, MediaTransfer, TransferOutcome};
use crate::mirror::poll;
use crate::mirror::transform::{transform, TransformOptions};
use crate::platforms::{DestinationPlatform, SourcePlatform};
use crate::service::events::{Event, EventBus};
use crate::types::{FetchCursor, SourcePost};

/// Terminal state of one source post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostState {
    Mirrored,
    SkippedDuplicate,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOutcome {
    pub source_id: String,
    pub state: PostState,
    pub destination_id: Option<String>,
    /// Attachments left off the submission
    pub dropped: Vec<AttachmentFailure>,
}

impl PostOutcome {
    pub fn mirrored(source_id: &str, destination_id: String, dropped: Vec<AttachmentFailure>) -> Self {
        Self {
            source_id: source_id.to_string(),
            state: PostState::Mirrored,
            destination_id: Some(destination_id),
            dropped,
        }
    }
}

/// Running tally of a pass; filled in even when the pass aborts
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub cursor: Option<FetchCursor>,
    pub outcomes: Vec<PostOutcome>,
}

impl PassReport {
    fn count(&self, state: PostState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn mirrored(&self) -> usize {
        self.count(PostState::Mirrored)
    }

    pub fn skipped(&self) -> usize {
        self.count(PostState::SkippedDuplicate)
    }

    pub fn failed(&self) -> usize {
        self.count(PostState::Failed)
    }
}

/// Everything one account's pass needs, borrowed for the pass
pub struct Pipeline<'a> {
    pub account: &'a str,
    pub source: &'a dyn SourcePlatform,
    pub destination: &'a dyn DestinationPlatform,
    pub db: &'a Database,
    pub events: &'a EventBus,
    pub capabilities: &'a Capabilities,
    pub options: &'a TransformOptions,
    /// When false, attachments are never downloaded
    pub media_upload: bool,
}

impl<'a> Pipeline<'a> {
    /// Mirror everything inside `cursor`, oldest first.
    ///
    /// Outcomes are appended to `report` as they happen. The first failed
    /// post aborts the rest of the pass and its error is returned.
    pub async fn run(&self, cursor: FetchCursor, report: &mut PassReport) -> Result<()> {
        report.cursor = Some(cursor);

        let mut posts = self.source.list_posts(cursor.since, cursor.max_count).await?;
        sort_chronologically(&mut posts);

        tracing::info!(
            account = self.account,
            candidates = posts.len(),
            since = %cursor.since,
            max_count = cursor.max_count,
            "Fetched source posts"
        );

        for post in &posts {
            match self.mirror_post(post).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(error) => {
                    tracing::error!(account = self.account, source_id = %post.id, %error, "Failed to mirror post");
                    report.outcomes.push(PostOutcome {
                        source_id: post.id.clone(),
                        state: PostState::Failed,
                        destination_id: None,
                        dropped: Vec::new(),
                    });
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    /// Mirror a single post unless it already has a mapping
    pub async fn mirror_post(&self, post: &SourcePost) -> Result<PostOutcome> {
        if let Some(destination_id) = self.db.destination_id_for(self.account, &post.id).await? {
            tracing::debug!(account = self.account, source_id = %post.id, "Already mirrored, skipping");
            self.events.emit(Event::PostSkipped {
                account: self.account.to_string(),
                source_id: post.id.clone(),
            });
            return Ok(PostOutcome {
                source_id: post.id.clone(),
                state: PostState::SkippedDuplicate,
                destination_id: Some(destination_id),
                dropped: Vec::new(),
            });
        }

        let (destination_id, dropped) = self.submit(post).await?;
        Ok(PostOutcome::mirrored(&post.id, destination_id, dropped))
    }

    /// Transfer media, submit and record the mapping of an unmapped post.
    ///
    /// Returns the destination id and the attachments left off.
    pub async fn submit(&self, post: &SourcePost) -> Result<(String, Vec<AttachmentFailure>)> {
        let mut media_ids = Vec::new();
        let mut dropped = Vec::new();

        if self.media_upload {
            let transfer = MediaTransfer::new(self.source, self.destination);
            for attachment in &post.attachments {
                match transfer.transfer(attachment).await? {
                    TransferOutcome::Uploaded(handle) => media_ids.push(handle.id),
                    TransferOutcome::Dropped(failure) => {
                        self.events.emit(Event::AttachmentDropped {
                            account: self.account.to_string(),
                            source_id: post.id.clone(),
                            url: failure.url.clone(),
                            reason: failure.reason.clone(),
                        });
                        dropped.push(failure);
                    }
                }
            }
        }

        let poll = poll::transcribe(post.poll.as_ref());
        let payload = transform(post, self.capabilities, self.options, media_ids, poll);
        let submitted = self.destination.submit_post(&payload).await?;

        self.db
            .record_mapping(self.account, &post.id, &submitted.id)
            .await?;

        tracing::info!(
            account = self.account,
            source_id = %post.id,
            destination_id = %submitted.id,
            "Mirrored post"
        );
        self.events.emit(Event::PostMirrored {
            account: self.account.to_string(),
            source_id: post.id.clone(),
            destination_id: submitted.id.clone(),
        });

        Ok((submitted.id, dropped))
    }
}

/// Ascending by creation time, ties broken by numeric id order
pub fn sort_chronologically(posts: &mut [SourcePost]) {
    posts.sort_by(|a, b| a.chronological_key().cmp(&b.chronological_key()));
}
