use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use reelay_core::models::{ProcessingJob, ThumbnailRegenerationPayload};
use reelay_core::JobError;
use reelay_processing::ThumbnailInput;
use reelay_worker::JobOutcome;

use crate::job_handlers::JobHandler;
use crate::state::AppState;

/// Re-runs the fallback chain for a record still on the placeholder.
pub struct ThumbnailRegenerationHandler;

#[async_trait]
impl JobHandler for ThumbnailRegenerationHandler {
    #[tracing::instrument(skip(self, job, state), fields(job.id = %job.id, video.id = %job.video_id))]
    async fn process(&self, job: &ProcessingJob, state: Arc<AppState>) -> Result<JobOutcome> {
        let payload: ThumbnailRegenerationPayload =
            job.try_payload_as().map_err(JobError::unrecoverable)?;

        let record = state.records.get(job.video_id).await?;
        let input = ThumbnailInput::for_record(&record).with_client_capture(payload.client_thumbnail);
        let resolution = state.thumbnails.resolve_and_store(&record, &input).await?;

        tracing::info!(
            video_id = %record.id,
            tier = %resolution.thumbnail.tier,
            upgraded = resolution.upgraded,
            "Thumbnail regeneration finished"
        );
        Ok(JobOutcome::Completed)
    }
}
