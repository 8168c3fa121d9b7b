//! Operator sweep over records still showing a placeholder thumbnail.

use std::sync::Arc;

use reelay_core::AppError;
use reelay_db::RecordStore;
use serde::Serialize;
use utoipa::ToSchema;

use crate::thumbnail::{ThumbnailChain, ThumbnailInput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReprocessBatchReport {
    pub processed: u32,
    pub upgraded: u32,
    /// Offset for the next call, `None` once the listing is exhausted.
    pub next_offset: Option<i64>,
}

pub struct ThumbnailReprocessor {
    records: RecordStore,
    thumbnails: Arc<ThumbnailChain>,
    max_batch: u32,
}

impl ThumbnailReprocessor {
    pub fn new(records: RecordStore, thumbnails: Arc<ThumbnailChain>, max_batch: u32) -> Self {
        Self {
            records,
            thumbnails,
            max_batch: max_batch.max(1),
        }
    }

    /// Re-run the thumbnail chain for one page of records.
    ///
    /// Upgraded records leave the listing, so the next offset only advances
    /// past the records that stayed behind.
    #[tracing::instrument(skip(self))]
    pub async fn run_batch(&self, offset: i64, limit: u32) -> Result<ReprocessBatchReport, AppError> {
        let offset = offset.max(0);
        let limit = limit.clamp(1, self.max_batch);
        let page = self
            .records
            .list_needing_thumbnails(i64::from(limit), offset)
            .await?;

        let mut upgraded = 0u32;
        for record in &page {
            let input = ThumbnailInput::for_record(record);
            match self.thumbnails.resolve_and_store(record, &input).await {
                Ok(resolution) if resolution.upgraded => upgraded += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(video_id = %record.id, error = %e, "Thumbnail reprocess failed");
                }
            }
        }

        let processed = page.len() as u32;
        let next_offset =
            (processed == limit).then(|| offset + i64::from(processed - upgraded));

        tracing::info!(processed, upgraded, ?next_offset, "Thumbnail reprocess batch finished");
        Ok(ReprocessBatchReport {
            processed,
            upgraded,
            next_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnail::ThumbnailChainConfig;
    use reelay_core::models::ThumbnailTier;
    use reelay_db::memory::{sample_new_video, InMemoryVideoStore};
    use reelay_provider::fake::{preparing_asset, ready_asset, FakeProvider};
    use std::time::Duration;

    fn reprocessor(
        videos: &Arc<InMemoryVideoStore>,
        provider: &Arc<FakeProvider>,
        synthesized_enabled: bool,
    ) -> ThumbnailReprocessor {
        let records = RecordStore::new(videos.clone(), 2);
        let chain = Arc::new(ThumbnailChain::new(
            provider.clone(),
            records.clone(),
            ThumbnailChainConfig {
                tier_timeout: Duration::from_secs(5),
                placeholder_url: "/static/video-placeholder.svg".to_string(),
                synthesized_enabled,
            },
        ));
        ThumbnailReprocessor::new(records, chain, 100)
    }

    #[tokio::test]
    async fn test_batch_upgrades_ready_assets_and_advances_past_the_rest() {
        let videos = Arc::new(InMemoryVideoStore::new());
        let provider = Arc::new(FakeProvider::new());
        let records = RecordStore::new(videos.clone(), 2);

        let ready = records.create(&sample_new_video(Some("asset-ready"))).await.unwrap();
        provider.set_asset(ready_asset("asset-ready", "pb-ready"));
        for i in 0..2 {
            let id = format!("asset-slow-{}", i);
            records.create(&sample_new_video(Some(&id))).await.unwrap();
            provider.set_asset(preparing_asset(&id, "pb-slow"));
        }

        let sweep = reprocessor(&videos, &provider, false);
        let report = sweep.run_batch(0, 3).await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.upgraded, 1);
        assert_eq!(report.next_offset, Some(2));
        assert_eq!(
            videos.snapshot(ready.id).unwrap().thumbnail_tier,
            Some(ThumbnailTier::ProviderFrame)
        );

        let report = sweep.run_batch(2, 3).await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(report.next_offset, None);
    }

    #[tokio::test]
    async fn test_limit_is_clamped_to_batch_maximum() {
        let videos = Arc::new(InMemoryVideoStore::new());
        let provider = Arc::new(FakeProvider::new());
        let records = RecordStore::new(videos.clone(), 2);
        for _ in 0..3 {
            records.create(&sample_new_video(None)).await.unwrap();
        }

        let chain = Arc::new(ThumbnailChain::new(
            provider.clone(),
            records.clone(),
            ThumbnailChainConfig {
                tier_timeout: Duration::from_secs(5),
                placeholder_url: "/static/video-placeholder.svg".to_string(),
                synthesized_enabled: true,
            },
        ));
        let sweep = ThumbnailReprocessor::new(records, chain, 2);
        let report = sweep.run_batch(0, 50).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.upgraded, 2);
        assert_eq!(report.next_offset, Some(0));

        let report = sweep.run_batch(0, 50).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.next_offset, None);
    }

    #[tokio::test]
    async fn test_store_outage_fails_the_batch() {
        let videos = Arc::new(InMemoryVideoStore::new());
        let provider = Arc::new(FakeProvider::new());
        videos.set_unavailable(true);

        let sweep = reprocessor(&videos, &provider, true);
        assert!(matches!(
            sweep.run_batch(0, 10).await,
            Err(AppError::Database(_))
        ));
    }
}
