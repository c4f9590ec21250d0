//! Mirrorcast - keep a Fediverse account in sync with a Twitter account
//!
//! This library mirrors posts, media, polls, profile metadata and pinned-post
//! state from a source account to a destination account over repeated runs,
//! without producing duplicates.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mirror;
pub mod platforms;
pub mod service;
pub mod template;
pub mod types;

// Re-export commonly used types
pub use config::{AccountSettings, Config};
pub use db::Database;
pub use error::{MirrorError, Result};
pub use types::{DestinationPost, PinState, SourcePost, SubmissionPayload};
