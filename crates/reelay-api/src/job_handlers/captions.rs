use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use reelay_core::models::{CaptionGenerationPayload, ProcessingJob};
use reelay_core::JobError;
use reelay_worker::JobOutcome;

use crate::job_handlers::JobHandler;
use crate::state::AppState;

/// Asks the provider for generated captions. The `video.asset.track.ready`
/// callback carrying the returned track id settles the job.
pub struct CaptionGenerationHandler;

#[async_trait]
impl JobHandler for CaptionGenerationHandler {
    #[tracing::instrument(skip(self, job, state), fields(job.id = %job.id, video.id = %job.video_id))]
    async fn process(&self, job: &ProcessingJob, state: Arc<AppState>) -> Result<JobOutcome> {
        let payload: CaptionGenerationPayload =
            job.try_payload_as().map_err(JobError::unrecoverable)?;

        let record = state.records.get(job.video_id).await?;
        let Some(asset_id) = record.external_asset_id.as_deref() else {
            return Err(JobError::unrecoverable(anyhow::anyhow!(
                "Video {} has no provider asset",
                record.id
            ))
            .into());
        };

        match state
            .provider
            .request_captions(asset_id, &payload.language)
            .await
        {
            Ok(track_id) => {
                tracing::info!(
                    video_id = %record.id,
                    track_id = %track_id,
                    language = %payload.language,
                    "Caption generation requested"
                );
                Ok(JobOutcome::AwaitingCallback {
                    external_job_id: Some(track_id),
                })
            }
            Err(e) if e.is_transient() => Err(JobError::recoverable(e).into()),
            Err(e) => Err(JobError::unrecoverable(e).into()),
        }
    }
}
