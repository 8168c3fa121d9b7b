use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reelay_core::models::{ThumbnailRef, ThumbnailTier};
use reelay_provider::ProcessingProvider;

use super::synthesized::preview_data_uri;
use super::ThumbnailInput;

/// One way of producing a thumbnail. `Ok(None)` means the tier has nothing to offer.
#[async_trait]
pub trait ThumbnailStrategy: Send + Sync {
    fn tier(&self) -> ThumbnailTier;

    async fn attempt(&self, input: &ThumbnailInput) -> Result<Option<ThumbnailRef>>;
}

/// Frame decoded by the provider. Needs a playback id and a ready asset.
pub struct ProviderFrameTier {
    provider: Arc<dyn ProcessingProvider>,
}

impl ProviderFrameTier {
    pub fn new(provider: Arc<dyn ProcessingProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ThumbnailStrategy for ProviderFrameTier {
    fn tier(&self) -> ThumbnailTier {
        ThumbnailTier::ProviderFrame
    }

    async fn attempt(&self, input: &ThumbnailInput) -> Result<Option<ThumbnailRef>> {
        if input.asset_ready {
            if let Some(playback_id) = &input.playback_id {
                return Ok(Some(ThumbnailRef::new(
                    self.provider.thumbnail_url(playback_id),
                    ThumbnailTier::ProviderFrame,
                )));
            }
        }

        // The stored state may lag the provider, e.g. after a lost callback.
        let Some(asset_id) = &input.external_asset_id else {
            return Ok(None);
        };
        let asset = self.provider.get_asset(asset_id).await?;
        Ok(asset
            .is_ready()
            .then(|| asset.playback_id())
            .flatten()
            .map(|pid| {
                ThumbnailRef::new(self.provider.thumbnail_url(pid), ThumbnailTier::ProviderFrame)
            }))
    }
}

pub struct SynthesizedPreviewTier {
    enabled: bool,
}

impl SynthesizedPreviewTier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl ThumbnailStrategy for SynthesizedPreviewTier {
    fn tier(&self) -> ThumbnailTier {
        ThumbnailTier::Synthesized
    }

    async fn attempt(&self, input: &ThumbnailInput) -> Result<Option<ThumbnailRef>> {
        if !self.enabled {
            return Ok(None);
        }
        Ok(Some(ThumbnailRef::new(
            preview_data_uri(input.video_id),
            ThumbnailTier::Synthesized,
        )))
    }
}

/// Frame captured by the uploading client, passed through as a URL or image data URI.
pub struct ClientCaptureTier;

fn acceptable_capture(capture: &str) -> bool {
    let capture = capture.trim();
    capture.starts_with("https://")
        || capture.starts_with("http://")
        || capture.starts_with("data:image/")
}

#[async_trait]
impl ThumbnailStrategy for ClientCaptureTier {
    fn tier(&self) -> ThumbnailTier {
        ThumbnailTier::ClientCapture
    }

    async fn attempt(&self, input: &ThumbnailInput) -> Result<Option<ThumbnailRef>> {
        Ok(input
            .client_capture
            .as_deref()
            .filter(|c| acceptable_capture(c))
            .map(|c| ThumbnailRef::new(c.trim(), ThumbnailTier::ClientCapture)))
    }
}

pub struct PlaceholderTier {
    url: String,
}

impl PlaceholderTier {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn thumbnail(&self) -> ThumbnailRef {
        ThumbnailRef::new(self.url.clone(), ThumbnailTier::Placeholder)
    }
}

#[async_trait]
impl ThumbnailStrategy for PlaceholderTier {
    fn tier(&self) -> ThumbnailTier {
        ThumbnailTier::Placeholder
    }

    async fn attempt(&self, _input: &ThumbnailInput) -> Result<Option<ThumbnailRef>> {
        Ok(Some(self.thumbnail()))
    }
}
