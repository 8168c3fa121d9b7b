use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use reelay_core::models::{AudioEnhancementPayload, ProcessingJob};
use reelay_core::JobError;
use reelay_provider::ProviderError;
use reelay_worker::JobOutcome;

use crate::job_handlers::JobHandler;
use crate::state::AppState;

/// Audio cleanup is optional: providers without it complete the job and
/// leave `audio_enhanced` unset.
pub struct AudioEnhancementHandler;

#[async_trait]
impl JobHandler for AudioEnhancementHandler {
    #[tracing::instrument(skip(self, job, state), fields(job.id = %job.id, video.id = %job.video_id))]
    async fn process(&self, job: &ProcessingJob, state: Arc<AppState>) -> Result<JobOutcome> {
        let _payload: AudioEnhancementPayload =
            job.try_payload_as().map_err(JobError::unrecoverable)?;

        let record = state.records.get(job.video_id).await?;
        let Some(asset_id) = record.external_asset_id.as_deref() else {
            return Err(JobError::unrecoverable(anyhow::anyhow!(
                "Video {} has no provider asset",
                record.id
            ))
            .into());
        };

        match state.provider.request_audio_enhancement(asset_id).await {
            Ok(external_job_id) => Ok(JobOutcome::AwaitingCallback {
                external_job_id: Some(external_job_id),
            }),
            Err(ProviderError::Unsupported(what)) => {
                tracing::info!(video_id = %record.id, feature = what, "Provider does not support audio enhancement, skipping");
                Ok(JobOutcome::Completed)
            }
            Err(e) if e.is_transient() => Err(JobError::recoverable(e).into()),
            Err(e) => Err(JobError::unrecoverable(e).into()),
        }
    }
}
