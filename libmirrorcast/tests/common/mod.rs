//! Shared fixtures for the integration tests

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use libmirrorcast::mirror::capabilities::Capabilities;
use libmirrorcast::mirror::cursor::DEFAULT_MAX_POSTS;
use libmirrorcast::mirror::pipeline::{PassReport, Pipeline};
use libmirrorcast::mirror::transform::{TransformOptions, DEFAULT_RICH_TEXT_CONTENT_TYPE};
use libmirrorcast::platforms::mock::{MockDestination, MockSource, PLEROMA_VERSION};
use libmirrorcast::service::events::EventBus;
use libmirrorcast::types::{FetchCursor, SourcePost, Visibility};
use libmirrorcast::Database;

pub const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// One account's worth of mocks, database and options
pub struct Harness {
    pub db: Database,
    pub source: MockSource,
    pub destination: MockDestination,
    pub events: EventBus,
    pub capabilities: Capabilities,
    pub options: TransformOptions,
}

impl Harness {
    pub async fn new(posts: Vec<SourcePost>) -> Result<Self> {
        Ok(Self {
            db: Database::in_memory().await?,
            source: MockSource::with_posts(posts),
            destination: MockDestination::new(),
            events: EventBus::default(),
            capabilities: Capabilities::from_version(PLEROMA_VERSION),
            options: TransformOptions {
                signature: true,
                source_url: "https://twitter.com/alice".to_string(),
                visibility: Visibility::Unlisted,
                sensitive_override: None,
                rich_text: false,
                content_type: DEFAULT_RICH_TEXT_CONTENT_TYPE.to_string(),
            },
        })
    }

    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            account: "alice",
            source: &self.source,
            destination: &self.destination,
            db: &self.db,
            events: &self.events,
            capabilities: &self.capabilities,
            options: &self.options,
            media_upload: true,
        }
    }

    pub async fn run(&self, since: DateTime<Utc>) -> (PassReport, libmirrorcast::Result<()>) {
        self.run_paged(since, DEFAULT_MAX_POSTS).await
    }

    pub async fn run_paged(
        &self,
        since: DateTime<Utc>,
        max_count: u8,
    ) -> (PassReport, libmirrorcast::Result<()>) {
        let mut report = PassReport::default();
        let cursor = FetchCursor { since, max_count };
        let result = self.pipeline().run(cursor, &mut report).await;
        (report, result)
    }
}

/// Minutes past noon on a fixed day
pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap()
}

/// A lower bound a day before every fixture post
pub fn window_start() -> DateTime<Utc> {
    at(0) - Duration::days(1)
}
