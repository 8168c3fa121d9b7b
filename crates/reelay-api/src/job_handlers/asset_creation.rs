//! Background asset creation for asynchronous intakes and operator retries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use reelay_core::models::{AssetCreationPayload, ProcessingJob, VideoRecord, VideoStatus};
use reelay_core::JobError;
use reelay_processing::input_url;
use reelay_provider::{AssetSnapshot, ProviderError};
use reelay_worker::JobOutcome;

use crate::job_handlers::JobHandler;
use crate::state::AppState;

pub struct AssetCreationHandler;

#[async_trait]
impl JobHandler for AssetCreationHandler {
    #[tracing::instrument(skip(self, job, state), fields(job.id = %job.id, video.id = %job.video_id, attempt = job.attempts))]
    async fn process(&self, job: &ProcessingJob, state: Arc<AppState>) -> Result<JobOutcome> {
        let _payload: AssetCreationPayload = job
            .try_payload_as()
            .map_err(JobError::unrecoverable)?;

        let Some(record) = state.records.find_by_id(job.video_id).await? else {
            return Err(JobError::unrecoverable(anyhow::anyhow!(
                "Video {} no longer exists",
                job.video_id
            ))
            .into());
        };
        if record.status.is_terminal() {
            tracing::info!(video_id = %record.id, status = %record.status, "Video already settled, nothing to create");
            return Ok(JobOutcome::Completed);
        }

        let created = match &record.external_asset_id {
            Some(asset_id) => state.provider.get_asset(asset_id).await,
            None => {
                let url = input_url(
                    state.config.storage_public_base_url(),
                    &record.storage_key,
                );
                state
                    .provider
                    .create_asset(&url, &record.id.to_string())
                    .await
            }
        };

        let snapshot: AssetSnapshot = match created {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_transient() && job.can_retry() => {
                tracing::warn!(video_id = %record.id, error = %e, "Transient provider error, job will retry");
                return Err(JobError::recoverable(e).into());
            }
            Err(e) => return Err(give_up(&state, &record, e).await),
        };

        if record.external_asset_id.is_none() {
            state
                .records
                .attach_external_asset(record.id, &snapshot.id, snapshot.playback_id())
                .await
                .context("Failed to attach provider asset")?;
        }
        let current = state
            .records
            .transition(record.id, VideoStatus::Processing)
            .await?
            .into_record();

        if snapshot.is_ready() {
            state.reconciler.apply_ready(&current, &snapshot).await?;
            return Ok(JobOutcome::Completed);
        }
        if snapshot.is_errored() {
            let reason = snapshot.error_summary();
            let (_, degraded) = state.reconciler.apply_errored(&current, &reason).await?;
            tracing::warn!(video_id = %record.id, degraded, reason = %reason, "Provider rejected the asset");
            return Err(JobError::unrecoverable(anyhow::anyhow!(
                "Provider reported an error: {}",
                reason
            ))
            .into());
        }

        tracing::info!(
            video_id = %record.id,
            external_asset_id = %snapshot.id,
            "Asset created, waiting for callback"
        );
        Ok(JobOutcome::AwaitingCallback {
            external_job_id: Some(snapshot.id),
        })
    }
}

/// Settle the record on a fallback and turn the provider error into a final job failure.
async fn give_up(
    state: &AppState,
    record: &VideoRecord,
    error: ProviderError,
) -> anyhow::Error {
    let reason = error.to_string();
    if let Err(e) = state.reconciler.apply_errored(record, &reason).await {
        tracing::error!(video_id = %record.id, error = %e, "Failed to record provider failure");
        return JobError::recoverable(e).into();
    }
    JobError::unrecoverable(error).into()
}
