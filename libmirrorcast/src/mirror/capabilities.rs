//! Destination capability probe

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::platforms::DestinationPlatform;

/// Display-name cap of servers outside the native family
pub const MASTODON_DISPLAY_NAME_LIMIT: usize = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineFamily {
    /// Pleroma and its forks (Akkoma reports a Pleroma-compatible string)
    Pleroma,
    /// Anything else, treated as Mastodon
    Mastodon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub engine: EngineFamily,
    pub max_display_name_len: Option<usize>,
    pub supports_rich_text: bool,
}

impl Capabilities {
    pub fn from_version(version: &str) -> Self {
        if version.contains("Pleroma") {
            Self {
                engine: EngineFamily::Pleroma,
                max_display_name_len: None,
                supports_rich_text: true,
            }
        } else {
            Self {
                engine: EngineFamily::Mastodon,
                max_display_name_len: Some(MASTODON_DISPLAY_NAME_LIMIT),
                supports_rich_text: false,
            }
        }
    }

    /// Truncate a display name to the server's limit, warning when it does
    pub fn clamp_display_name(&self, name: &str) -> String {
        match self.max_display_name_len {
            Some(limit) if name.chars().count() > limit => {
                tracing::warn!(
                    limit,
                    "Server doesn't support display names longer than {} characters, truncating",
                    limit
                );
                name.chars().take(limit).collect()
            }
            _ => name.to_string(),
        }
    }

    /// Whether rich text may be used; warns when a request has to be dropped
    pub fn allow_rich_text(&self, requested: bool) -> bool {
        if requested && !self.supports_rich_text {
            tracing::warn!(engine = ?self.engine, "Server doesn't support rich text, disabling it");
            return false;
        }
        requested
    }
}

/// Query the destination once and derive its feature flags
pub async fn probe(destination: &dyn DestinationPlatform) -> Result<Capabilities> {
    let metadata = destination.instance_metadata().await?;
    let capabilities = Capabilities::from_version(&metadata.version);

    if capabilities.engine == EngineFamily::Mastodon {
        tracing::debug!(version = %metadata.version, "Assuming target instance is Mastodon");
    }

    Ok(capabilities)
}
