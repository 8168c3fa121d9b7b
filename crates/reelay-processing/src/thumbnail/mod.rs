//! Thumbnail fallback chain.
//!
//! Tiers are tried best first and each runs under its own timeout. A tier
//! that errors, times out or has nothing to offer falls through to the next;
//! the placeholder closes the chain, so resolution always yields a reference.

mod synthesized;
mod tiers;

use std::sync::Arc;
use std::time::Duration;

use reelay_core::models::{ThumbnailRef, ThumbnailTier, VideoRecord, VideoStatus};
use reelay_core::{AppError, Config};
use reelay_db::RecordStore;
use reelay_provider::{AssetSnapshot, ProcessingProvider};
use uuid::Uuid;

pub use synthesized::{preview_data_uri, preview_svg};
pub use tiers::{
    ClientCaptureTier, PlaceholderTier, ProviderFrameTier, SynthesizedPreviewTier,
    ThumbnailStrategy,
};

/// What the tiers know about the video.
#[derive(Debug, Clone)]
pub struct ThumbnailInput {
    pub video_id: Uuid,
    pub external_asset_id: Option<String>,
    pub playback_id: Option<String>,
    pub asset_ready: bool,
    pub client_capture: Option<String>,
}

impl ThumbnailInput {
    pub fn for_record(record: &VideoRecord) -> Self {
        Self {
            video_id: record.id,
            external_asset_id: record.external_asset_id.clone(),
            playback_id: record.external_playback_id.clone(),
            asset_ready: record.status == VideoStatus::Ready,
            client_capture: None,
        }
    }

    pub fn from_snapshot(record: &VideoRecord, snapshot: &AssetSnapshot) -> Self {
        Self {
            video_id: record.id,
            external_asset_id: Some(snapshot.id.clone()),
            playback_id: snapshot
                .playback_id()
                .map(str::to_string)
                .or_else(|| record.external_playback_id.clone()),
            asset_ready: snapshot.is_ready(),
            client_capture: None,
        }
    }

    pub fn with_client_capture(mut self, client_capture: Option<String>) -> Self {
        self.client_capture = client_capture;
        self
    }

    /// Skip asking the provider about the asset, e.g. once it reported an error.
    pub fn without_provider_lookup(mut self) -> Self {
        self.external_asset_id = None;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailChainConfig {
    pub tier_timeout: Duration,
    pub placeholder_url: String,
    pub synthesized_enabled: bool,
}

impl ThumbnailChainConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tier_timeout: Duration::from_secs(config.thumbnail_tier_timeout_secs()),
            placeholder_url: config.thumbnail_placeholder_url().to_string(),
            synthesized_enabled: config.thumbnail_synthesized_enabled(),
        }
    }
}

/// Best thumbnail known after a resolve-and-store pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailResolution {
    pub thumbnail: ThumbnailRef,
    pub upgraded: bool,
}

pub struct ThumbnailChain {
    strategies: Vec<Arc<dyn ThumbnailStrategy>>,
    placeholder: PlaceholderTier,
    tier_timeout: Duration,
    records: RecordStore,
}

impl ThumbnailChain {
    pub fn new(
        provider: Arc<dyn ProcessingProvider>,
        records: RecordStore,
        config: ThumbnailChainConfig,
    ) -> Self {
        let strategies: Vec<Arc<dyn ThumbnailStrategy>> = vec![
            Arc::new(ProviderFrameTier::new(provider)),
            Arc::new(SynthesizedPreviewTier::new(config.synthesized_enabled)),
            Arc::new(ClientCaptureTier),
            Arc::new(PlaceholderTier::new(config.placeholder_url.clone())),
        ];
        Self::with_strategies(strategies, records, config)
    }

    pub fn with_strategies(
        mut strategies: Vec<Arc<dyn ThumbnailStrategy>>,
        records: RecordStore,
        config: ThumbnailChainConfig,
    ) -> Self {
        strategies.sort_by_key(|s| s.tier().rank());
        Self {
            strategies,
            placeholder: PlaceholderTier::new(config.placeholder_url),
            tier_timeout: config.tier_timeout,
            records,
        }
    }

    pub fn placeholder(&self) -> ThumbnailRef {
        self.placeholder.thumbnail()
    }

    /// Best available thumbnail. Never fails.
    pub async fn resolve(&self, input: &ThumbnailInput) -> ThumbnailRef {
        self.resolve_better_than(input, None)
            .await
            .unwrap_or_else(|| self.placeholder())
    }

    async fn resolve_better_than(
        &self,
        input: &ThumbnailInput,
        current: Option<ThumbnailTier>,
    ) -> Option<ThumbnailRef> {
        let candidates = self
            .strategies
            .iter()
            .filter(|s| current.map_or(true, |c| s.tier().outranks(c)));

        for strategy in candidates {
            let tier = strategy.tier();
            match tokio::time::timeout(self.tier_timeout, strategy.attempt(input)).await {
                Ok(Ok(Some(thumbnail))) => {
                    tracing::debug!(video_id = %input.video_id, tier = %tier, "Thumbnail tier succeeded");
                    return Some(thumbnail);
                }
                Ok(Ok(None)) => {
                    tracing::debug!(video_id = %input.video_id, tier = %tier, "Thumbnail tier unavailable");
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        video_id = %input.video_id,
                        tier = %tier,
                        error = %e,
                        "Thumbnail tier failed, falling through"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        video_id = %input.video_id,
                        tier = %tier,
                        timeout_secs = self.tier_timeout.as_secs(),
                        "Thumbnail tier timed out, falling through"
                    );
                }
            }
        }

        if current.is_none() {
            Some(self.placeholder())
        } else {
            None
        }
    }

    /// Resolve a thumbnail for `record` and store it if it outranks the stored one.
    #[tracing::instrument(skip(self, record, input), fields(video.id = %record.id))]
    pub async fn resolve_and_store(
        &self,
        record: &VideoRecord,
        input: &ThumbnailInput,
    ) -> Result<ThumbnailResolution, AppError> {
        let current = record.thumbnail();
        let Some(candidate) = self
            .resolve_better_than(input, current.as_ref().map(|t| t.tier))
            .await
        else {
            return Ok(ThumbnailResolution {
                thumbnail: current.unwrap_or_else(|| self.placeholder()),
                upgraded: false,
            });
        };

        if self.records.upgrade_thumbnail(record.id, &candidate).await? {
            tracing::info!(
                video_id = %record.id,
                tier = %candidate.tier,
                "Thumbnail upgraded"
            );
            return Ok(ThumbnailResolution {
                thumbnail: candidate,
                upgraded: true,
            });
        }

        // A concurrent writer stored something at least as good.
        let stored = self
            .records
            .find_by_id(record.id)
            .await?
            .and_then(|r| r.thumbnail())
            .unwrap_or(candidate);
        Ok(ThumbnailResolution {
            thumbnail: stored,
            upgraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use reelay_db::memory::{sample_new_video, InMemoryVideoStore};
    use reelay_provider::fake::{ready_asset, FakeProvider};

    struct Failing(ThumbnailTier);

    #[async_trait]
    impl ThumbnailStrategy for Failing {
        fn tier(&self) -> ThumbnailTier {
            self.0
        }

        async fn attempt(&self, _input: &ThumbnailInput) -> anyhow::Result<Option<ThumbnailRef>> {
            Err(anyhow!("tier {} is down", self.0))
        }
    }

    struct Hanging(ThumbnailTier);

    #[async_trait]
    impl ThumbnailStrategy for Hanging {
        fn tier(&self) -> ThumbnailTier {
            self.0
        }

        async fn attempt(&self, _input: &ThumbnailInput) -> anyhow::Result<Option<ThumbnailRef>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
    }

    fn config() -> ThumbnailChainConfig {
        ThumbnailChainConfig {
            tier_timeout: Duration::from_secs(2),
            placeholder_url: "/static/video-placeholder.svg".to_string(),
            synthesized_enabled: true,
        }
    }

    fn records() -> (Arc<InMemoryVideoStore>, RecordStore) {
        let videos = Arc::new(InMemoryVideoStore::new());
        let store = RecordStore::new(videos.clone(), 2);
        (videos, store)
    }

    fn input(video_id: Uuid) -> ThumbnailInput {
        ThumbnailInput {
            video_id,
            external_asset_id: None,
            playback_id: None,
            asset_ready: false,
            client_capture: Some("https://client.test/frame.jpg".to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_when_every_other_tier_fails() {
        let (_, store) = records();
        let strategies: Vec<Arc<dyn ThumbnailStrategy>> = vec![
            Arc::new(Failing(ThumbnailTier::ProviderFrame)),
            Arc::new(Hanging(ThumbnailTier::Synthesized)),
            Arc::new(Failing(ThumbnailTier::ClientCapture)),
            Arc::new(PlaceholderTier::new("/static/video-placeholder.svg")),
        ];
        let chain = ThumbnailChain::with_strategies(strategies, store, config());

        let thumbnail = chain.resolve(&input(Uuid::new_v4())).await;
        assert_eq!(thumbnail.tier, ThumbnailTier::Placeholder);
        assert_eq!(thumbnail.url, "/static/video-placeholder.svg");
    }

    #[tokio::test]
    async fn test_chain_without_placeholder_still_returns_one() {
        let (_, store) = records();
        let chain = ThumbnailChain::with_strategies(
            vec![Arc::new(Failing(ThumbnailTier::ProviderFrame))],
            store,
            config(),
        );
        let thumbnail = chain.resolve(&input(Uuid::new_v4())).await;
        assert_eq!(thumbnail.tier, ThumbnailTier::Placeholder);
    }

    #[tokio::test]
    async fn test_default_chain_prefers_provider_frame_when_ready() {
        let (_, store) = records();
        let provider = Arc::new(FakeProvider::new());
        let chain = ThumbnailChain::new(provider, store, config());

        let mut ready = input(Uuid::new_v4());
        ready.asset_ready = true;
        ready.playback_id = Some("pb-1".to_string());
        let thumbnail = chain.resolve(&ready).await;
        assert_eq!(thumbnail.tier, ThumbnailTier::ProviderFrame);
        assert_eq!(thumbnail.url, "https://image.test/pb-1/thumbnail.jpg");

        let pending = chain.resolve(&input(Uuid::new_v4())).await;
        assert_eq!(pending.tier, ThumbnailTier::Synthesized);
    }

    #[tokio::test]
    async fn test_provider_frame_checks_provider_when_record_lags() {
        let (_, store) = records();
        let provider = Arc::new(FakeProvider::new());
        provider.set_asset(ready_asset("asset-1", "pb-9"));
        let chain = ThumbnailChain::new(provider, store, config());

        let mut lagging = input(Uuid::new_v4());
        lagging.external_asset_id = Some("asset-1".to_string());
        let thumbnail = chain.resolve(&lagging).await;
        assert_eq!(thumbnail.tier, ThumbnailTier::ProviderFrame);
    }

    #[tokio::test]
    async fn test_resolve_and_store_upgrades_but_never_downgrades() {
        let (videos, store) = records();
        let record = store.create(&sample_new_video(None)).await.unwrap();
        let provider = Arc::new(FakeProvider::new());
        let chain = ThumbnailChain::new(provider, store.clone(), config());

        // Placeholder -> synthesized.
        let first = chain
            .resolve_and_store(&record, &ThumbnailInput::for_record(&record))
            .await
            .unwrap();
        assert!(first.upgraded);
        assert_eq!(first.thumbnail.tier, ThumbnailTier::Synthesized);

        // Provider frame arrives later and wins.
        let record = videos.snapshot(record.id).unwrap();
        let mut ready = ThumbnailInput::for_record(&record);
        ready.asset_ready = true;
        ready.playback_id = Some("pb-2".to_string());
        let second = chain.resolve_and_store(&record, &ready).await.unwrap();
        assert!(second.upgraded);
        assert_eq!(second.thumbnail.tier, ThumbnailTier::ProviderFrame);

        // Nothing below tier 1 is ever written back.
        let record = videos.snapshot(record.id).unwrap();
        let third = chain
            .resolve_and_store(&record, &input(record.id))
            .await
            .unwrap();
        assert!(!third.upgraded);
        assert_eq!(third.thumbnail.tier, ThumbnailTier::ProviderFrame);
        assert_eq!(
            videos.snapshot(record.id).unwrap().thumbnail_tier,
            Some(ThumbnailTier::ProviderFrame)
        );
    }
}
