//! Profile metadata sync: display name, bio, avatar and banner

use crate::error::Result;
use crate::mirror::capabilities::Capabilities;
use crate::mirror::media::{classify, upload_filename};
use crate::platforms::{DestinationPlatform, SourcePlatform};
use crate::template::{render, TemplateVars};
use crate::types::{MediaFile, MediaKind, ProfileUpdate};

/// Account-level profile choices
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    /// Replaces the source display name when set
    pub display_name: Option<String>,
    /// Bio template; `None` leaves the destination bio untouched
    pub bio_text: Option<String>,
}

pub struct ProfileSync<'a> {
    source: &'a dyn SourcePlatform,
    destination: &'a dyn DestinationPlatform,
    capabilities: &'a Capabilities,
}

impl<'a> ProfileSync<'a> {
    pub fn new(
        source: &'a dyn SourcePlatform,
        destination: &'a dyn DestinationPlatform,
        capabilities: &'a Capabilities,
    ) -> Self {
        Self {
            source,
            destination,
            capabilities,
        }
    }

    /// Push the source profile to the destination and return what was sent.
    ///
    /// `vars` gains `source_bio` before the bio template is rendered. Image
    /// download failures only cost that image.
    pub async fn sync(&self, options: &ProfileOptions, vars: &TemplateVars) -> Result<ProfileUpdate> {
        let profile = self.source.profile().await?;

        let name = options
            .display_name
            .clone()
            .unwrap_or_else(|| profile.display_name.clone());
        let display_name = (!name.is_empty()).then(|| self.capabilities.clamp_display_name(&name));

        let note = match &options.bio_text {
            Some(template) => {
                let vars = vars.clone().with("source_bio", profile.description.clone());
                Some(render(template, &vars)?)
            }
            None => None,
        };

        let update = ProfileUpdate {
            display_name,
            note,
            avatar: self.fetch_image("avatar", profile.avatar_url.as_deref()).await,
            header: self.fetch_image("banner", profile.banner_url.as_deref()).await,
        };

        if update.is_empty() {
            tracing::debug!("Nothing to update on the destination profile");
            return Ok(update);
        }

        self.destination.update_profile(&update).await?;
        tracing::info!(
            display_name = ?update.display_name,
            avatar = update.avatar.is_some(),
            banner = update.header.is_some(),
            "Updated destination profile"
        );

        Ok(update)
    }

    async fn fetch_image(&self, label: &str, url: Option<&str>) -> Option<MediaFile> {
        let url = url?;
        match self.source.download(url).await {
            Ok(bytes) => {
                let (mime, extension) = classify(&bytes, url, MediaKind::Image);
                Some(MediaFile {
                    bytes,
                    filename: upload_filename(&extension),
                    mime,
                })
            }
            Err(error) => {
                tracing::warn!(image = label, url, %error, "Could not download profile image, skipping it");
                None
            }
        }
    }
}
