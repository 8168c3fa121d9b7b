//! Merging provider outcomes into a record. Shared by the synchronous
//! coordinator and the webhook event processor so both apply identical rules.

use std::sync::Arc;

use reelay_core::models::{
    AudioEnhancementPayload, CaptionGenerationPayload, JobType, VideoPatch, VideoRecord,
    VideoStatus,
};
use reelay_core::{AppError, Config};
use reelay_db::{submit_job, JobStore, RecordStore};
use reelay_provider::{AssetSnapshot, ProcessingProvider};

use crate::thumbnail::{ThumbnailChain, ThumbnailInput};

pub const EXTERNAL_STATUS_ERRORED: &str = "errored";

/// Background jobs queued the moment a record first becomes `ready`.
#[derive(Debug, Clone, Default)]
pub struct ReadyFollowUps {
    pub jobs: Vec<(JobType, serde_json::Value)>,
    pub max_attempts: i32,
}

impl ReadyFollowUps {
    pub fn from_config(config: &Config) -> Self {
        let mut jobs = Vec::new();
        if config.captions_enabled() {
            jobs.push((
                JobType::CaptionGeneration,
                serde_json::json!(CaptionGenerationPayload::default()),
            ));
        }
        if config.audio_enhancement_enabled() {
            jobs.push((
                JobType::AudioEnhancement,
                serde_json::json!(AudioEnhancementPayload::default()),
            ));
        }
        Self {
            jobs,
            max_attempts: config.job_queue_max_retries(),
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    records: RecordStore,
    provider: Arc<dyn ProcessingProvider>,
    thumbnails: Arc<ThumbnailChain>,
    follow_ups: Option<(Arc<dyn JobStore>, ReadyFollowUps)>,
}

impl Reconciler {
    pub fn new(
        records: RecordStore,
        provider: Arc<dyn ProcessingProvider>,
        thumbnails: Arc<ThumbnailChain>,
    ) -> Self {
        Self {
            records,
            provider,
            thumbnails,
            follow_ups: None,
        }
    }

    /// Queue `follow_ups` whenever `apply_ready` is the call that made a record ready.
    pub fn with_follow_ups(mut self, jobs: Arc<dyn JobStore>, follow_ups: ReadyFollowUps) -> Self {
        self.follow_ups = Some((jobs, follow_ups));
        self
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn provider(&self) -> &Arc<dyn ProcessingProvider> {
        &self.provider
    }

    pub fn thumbnails(&self) -> &Arc<ThumbnailChain> {
        &self.thumbnails
    }

    /// Merge a ready asset: authoritative metadata, `ready` status and the
    /// provider frame. Returns the fresh record and whether the status changed.
    #[tracing::instrument(skip(self, record, snapshot), fields(video.id = %record.id, external_asset_id = %snapshot.id))]
    pub async fn apply_ready(
        &self,
        record: &VideoRecord,
        snapshot: &AssetSnapshot,
    ) -> Result<(VideoRecord, bool), AppError> {
        let mut metadata = snapshot.authoritative_metadata(record.size_bytes);
        metadata.streaming_url = metadata
            .external_playback_id
            .as_deref()
            .map(|pid| self.provider.stream_url(pid));

        let change = self.records.mark_ready(record.id, &metadata).await?;
        let applied = change.is_applied();
        if applied {
            tracing::info!(
                video_id = %record.id,
                duration_seconds = ?metadata.duration_seconds,
                "Authoritative metadata merged"
            );
        } else {
            tracing::debug!(
                video_id = %record.id,
                status = %change.record().status,
                "Ready ignored for record in terminal state"
            );
        }

        let current = change.into_record();
        if applied {
            self.queue_follow_ups(&current).await;
        }
        if current.status != VideoStatus::Failed {
            let input = ThumbnailInput::from_snapshot(&current, snapshot);
            self.thumbnails.resolve_and_store(&current, &input).await?;
        }

        let fresh = self.records.get(record.id).await?;
        Ok((fresh, applied))
    }

    /// The record is ready whether or not this succeeds, so failures are logged, not returned.
    async fn queue_follow_ups(&self, record: &VideoRecord) {
        let Some((jobs, follow_ups)) = &self.follow_ups else {
            return;
        };
        for (job_type, payload) in &follow_ups.jobs {
            let submitted = submit_job(
                jobs.as_ref(),
                record.id,
                *job_type,
                payload.clone(),
                follow_ups.max_attempts,
            )
            .await;
            if let Err(e) = submitted {
                tracing::error!(
                    video_id = %record.id,
                    job_type = %job_type,
                    error = %e,
                    "Failed to queue follow-up job"
                );
            }
        }
    }

    /// Handle a provider-reported failure. The record is only marked `failed`
    /// when no usable fallback thumbnail exists; otherwise it stays in its
    /// current status flagged as degraded. Returns the record and the degraded flag.
    #[tracing::instrument(skip(self, record), fields(video.id = %record.id))]
    pub async fn apply_errored(
        &self,
        record: &VideoRecord,
        reason: &str,
    ) -> Result<(VideoRecord, bool), AppError> {
        if record.status.is_terminal() {
            return Ok((record.clone(), false));
        }

        let mut current = record.clone();
        if !current.has_usable_thumbnail() {
            let input = ThumbnailInput::for_record(&current).without_provider_lookup();
            self.thumbnails.resolve_and_store(&current, &input).await?;
            current = self.records.get(record.id).await?;
        }

        let patch = VideoPatch {
            external_status: Some(EXTERNAL_STATUS_ERRORED.to_string()),
            ..Default::default()
        };

        if current.has_usable_thumbnail() {
            self.records
                .transition(record.id, VideoStatus::Processing)
                .await?;
            let updated = self.records.apply_patch(record.id, &patch).await?;
            tracing::warn!(
                video_id = %record.id,
                reason = %reason,
                thumbnail_tier = ?updated.thumbnail_tier,
                "Provider reported an error; keeping record with fallback thumbnail"
            );
            return Ok((updated, true));
        }

        self.records.apply_patch(record.id, &patch).await?;
        let change = self.records.transition(record.id, VideoStatus::Failed).await?;
        tracing::warn!(
            video_id = %record.id,
            reason = %reason,
            status = %change.record().status,
            "Provider reported an error; record marked failed"
        );
        Ok((change.into_record(), false))
    }
}
