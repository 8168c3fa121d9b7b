//! JobHandlerContext implementation for AppState.
//!
//! Dispatches jobs to the appropriate handler based on job type.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use reelay_core::models::{JobType, ProcessingJob};
use reelay_worker::{JobHandlerContext, JobOutcome};

use crate::job_handlers::{
    AssetCreationHandler, AudioEnhancementHandler, CaptionGenerationHandler, JobHandler,
    ThumbnailRegenerationHandler,
};
use crate::state::AppState;

#[async_trait]
impl JobHandlerContext for AppState {
    async fn dispatch_job(self: Arc<Self>, job: &ProcessingJob) -> Result<JobOutcome> {
        match job.job_type {
            JobType::AssetCreation => AssetCreationHandler.process(job, self).await,
            JobType::CaptionGeneration => CaptionGenerationHandler.process(job, self).await,
            JobType::AudioEnhancement => AudioEnhancementHandler.process(job, self).await,
            JobType::ThumbnailRegeneration => {
                ThumbnailRegenerationHandler.process(job, self).await
            }
        }
    }
}
