//! Idempotency guard over the video store.
//!
//! `RecordStore` is the only component that writes video records. Callers
//! propose changes through it; the underlying `VideoStore` makes each change
//! conditional so concurrent writers converge on one consistent record.

use std::sync::Arc;

use reelay_core::models::{
    AuthoritativeMetadata, NewVideoRecord, ThumbnailRef, VideoPatch, VideoRecord, VideoStatus,
};
use reelay_core::AppError;
use uuid::Uuid;

use super::video::{StatusChange, VideoStore};

#[derive(Clone)]
pub struct RecordStore {
    videos: Arc<dyn VideoStore>,
    max_find_or_create_attempts: u32,
}

impl RecordStore {
    pub fn new(videos: Arc<dyn VideoStore>, max_find_or_create_attempts: u32) -> Self {
        Self {
            videos,
            max_find_or_create_attempts: max_find_or_create_attempts.max(1),
        }
    }

    pub fn max_find_or_create_attempts(&self) -> u32 {
        self.max_find_or_create_attempts
    }

    /// Persist a new pending record. Fails rather than degrading when storage is unavailable.
    pub async fn create(&self, new: &NewVideoRecord) -> Result<VideoRecord, AppError> {
        self.videos.insert(new).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<VideoRecord>, AppError> {
        self.videos.find_by_id(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<VideoRecord, AppError> {
        self.videos
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Video {} not found", id)))
    }

    /// Lookup errors are returned as errors, never as `None`.
    pub async fn find_by_external_asset_id(
        &self,
        external_asset_id: &str,
    ) -> Result<Option<VideoRecord>, AppError> {
        self.videos.find_by_external_asset_id(external_asset_id).await
    }

    /// Return the record owning `new.external_asset_id`, creating it if needed.
    ///
    /// A uniqueness conflict means a concurrent caller won the race, so the
    /// lookup is repeated. The loop is capped; exhausting it yields
    /// `AppError::TooManyAttempts`. The boolean is `true` when this call inserted.
    #[tracing::instrument(skip(self, new), fields(video.id = %new.id))]
    pub async fn find_or_create_by_external_asset_id(
        &self,
        new: &NewVideoRecord,
    ) -> Result<(VideoRecord, bool), AppError> {
        let external_asset_id = new.external_asset_id.as_deref().ok_or_else(|| {
            AppError::InvalidInput("find-or-create requires an external asset id".to_string())
        })?;

        for attempt in 1..=self.max_find_or_create_attempts {
            if let Some(existing) = self
                .videos
                .find_by_external_asset_id(external_asset_id)
                .await?
            {
                tracing::debug!(
                    video_id = %existing.id,
                    external_asset_id = %external_asset_id,
                    attempt,
                    "Existing record found for external asset"
                );
                return Ok((existing, false));
            }

            match self.videos.insert(new).await {
                Ok(record) => return Ok((record, true)),
                Err(AppError::DuplicateExternalAsset(_)) => {
                    tracing::debug!(
                        external_asset_id = %external_asset_id,
                        attempt,
                        max_attempts = self.max_find_or_create_attempts,
                        "Lost creation race, re-querying winner"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            external_asset_id = %external_asset_id,
            attempts = self.max_find_or_create_attempts,
            "Find-or-create circuit breaker tripped"
        );
        Err(AppError::TooManyAttempts {
            external_asset_id: external_asset_id.to_string(),
            attempts: self.max_find_or_create_attempts,
        })
    }

    pub async fn attach_external_asset(
        &self,
        id: Uuid,
        external_asset_id: &str,
        external_playback_id: Option<&str>,
    ) -> Result<VideoRecord, AppError> {
        self.videos
            .attach_external_asset(id, external_asset_id, external_playback_id)
            .await
    }

    pub async fn transition(&self, id: Uuid, target: VideoStatus) -> Result<StatusChange, AppError> {
        let change = self.videos.transition(id, target).await?;
        if let StatusChange::Rejected(current) = &change {
            tracing::debug!(
                video_id = %id,
                current = %current.status,
                requested = %target,
                "Status change rejected"
            );
        }
        Ok(change)
    }

    pub async fn mark_ready(
        &self,
        id: Uuid,
        metadata: &AuthoritativeMetadata,
    ) -> Result<StatusChange, AppError> {
        self.videos.mark_ready(id, metadata).await
    }

    pub async fn upgrade_thumbnail(&self, id: Uuid, thumbnail: &ThumbnailRef) -> Result<bool, AppError> {
        self.videos.upgrade_thumbnail(id, thumbnail).await
    }

    pub async fn apply_patch(&self, id: Uuid, patch: &VideoPatch) -> Result<VideoRecord, AppError> {
        if patch.is_empty() {
            return self.get(id).await;
        }
        self.videos.apply_patch(id, patch).await
    }

    pub async fn list_needing_thumbnails(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VideoRecord>, AppError> {
        self.videos.list_needing_thumbnails(limit, offset).await
    }

    pub async fn reset_for_retry(&self, id: Uuid) -> Result<VideoRecord, AppError> {
        self.videos.reset_for_retry(id).await
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.videos.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{sample_new_video, InMemoryVideoStore};

    fn store(videos: &Arc<InMemoryVideoStore>, max: u32) -> RecordStore {
        RecordStore::new(videos.clone(), max)
    }

    #[tokio::test]
    async fn test_find_or_create_creates_once() {
        let videos = Arc::new(InMemoryVideoStore::new());
        let records = store(&videos, 2);

        let new = sample_new_video(Some("asset-1"));
        let (first, created) = records
            .find_or_create_by_external_asset_id(&new)
            .await
            .unwrap();
        assert!(created);

        let again = sample_new_video(Some("asset-1"));
        let (second, created) = records
            .find_or_create_by_external_asset_id(&again)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(videos.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_converge_on_one_record() {
        let videos = Arc::new(InMemoryVideoStore::new());
        let records = store(&videos, 2);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let records = records.clone();
            handles.push(tokio::spawn(async move {
                let new = sample_new_video(Some("asset-shared"));
                records
                    .find_or_create_by_external_asset_id(&new)
                    .await
                    .map(|(record, _)| record.id)
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(videos.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_race_returns_winner() {
        let videos = Arc::new(InMemoryVideoStore::new());
        let winner = videos
            .insert(&sample_new_video(Some("asset-race")))
            .await
            .unwrap();
        // The first lookup misses, as if the winner committed just after it.
        videos.hide_from_next_lookups(1);

        let records = store(&videos, 2);
        let (record, created) = records
            .find_or_create_by_external_asset_id(&sample_new_video(Some("asset-race")))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(record.id, winner.id);
    }

    #[tokio::test]
    async fn test_circuit_breaker_trips_after_max_attempts() {
        let videos = Arc::new(InMemoryVideoStore::new());
        videos.force_insert_conflicts(10);
        let records = store(&videos, 2);

        let err = records
            .find_or_create_by_external_asset_id(&sample_new_video(Some("asset-loop")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::TooManyAttempts { attempts: 2, ref external_asset_id } if external_asset_id == "asset-loop"
        ));
        assert_eq!(videos.insert_calls(), 2);
        assert_eq!(videos.len(), 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_propagated_not_treated_as_absent() {
        let videos = Arc::new(InMemoryVideoStore::new());
        videos.set_unavailable(true);
        let records = store(&videos, 2);

        let err = records
            .find_or_create_by_external_asset_id(&sample_new_video(Some("asset-down")))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(videos.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_fails_when_store_unavailable() {
        let videos = Arc::new(InMemoryVideoStore::new());
        videos.set_unavailable(true);
        let records = store(&videos, 2);

        let result = records.create(&sample_new_video(None)).await;
        assert!(matches!(result, Err(AppError::Database(_))));
        videos.set_unavailable(false);
        assert_eq!(videos.len(), 0);
    }

    #[tokio::test]
    async fn test_find_or_create_requires_external_id() {
        let videos = Arc::new(InMemoryVideoStore::new());
        let records = store(&videos, 2);
        let err = records
            .find_or_create_by_external_asset_id(&sample_new_video(None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
