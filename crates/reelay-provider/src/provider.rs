use async_trait::async_trait;

use crate::asset::AssetSnapshot;
use crate::error::ProviderError;

/// External transcoding provider.
///
/// Implementations must be cheap to share across tasks; callers hold them as
/// `Arc<dyn ProcessingProvider>`.
#[async_trait]
pub trait ProcessingProvider: Send + Sync {
    /// Ask the provider to ingest `input_url`. `passthrough` is echoed back in callbacks.
    async fn create_asset(
        &self,
        input_url: &str,
        passthrough: &str,
    ) -> Result<AssetSnapshot, ProviderError>;

    async fn get_asset(&self, asset_id: &str) -> Result<AssetSnapshot, ProviderError>;

    /// Request generated captions. Returns the provider's id for the caption track.
    async fn request_captions(
        &self,
        asset_id: &str,
        language: &str,
    ) -> Result<String, ProviderError>;

    async fn request_audio_enhancement(&self, _asset_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported("audio enhancement"))
    }

    /// Download a text resource such as a caption track.
    async fn fetch_text(&self, url: &str) -> Result<String, ProviderError>;

    fn thumbnail_url(&self, playback_id: &str) -> String;

    fn stream_url(&self, playback_id: &str) -> String;

    fn download_url(&self, playback_id: &str) -> String;

    fn text_track_url(&self, playback_id: &str, track_id: &str) -> String;
}
