mod asset_creation;
mod audio;
mod captions;
mod thumbnails;

pub use asset_creation::AssetCreationHandler;
pub use audio::AudioEnhancementHandler;
pub use captions::CaptionGenerationHandler;
pub use thumbnails::ThumbnailRegenerationHandler;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::state::AppState;
use reelay_core::models::ProcessingJob;
use reelay_worker::JobOutcome;

/// Trait for background job handlers.
///
/// Return a [`reelay_core::JobError::unrecoverable`] to stop retries; any
/// other error is retried while the job has attempts left.
#[async_trait]
pub trait JobHandler {
    async fn process(&self, job: &ProcessingJob, state: Arc<AppState>) -> Result<JobOutcome>;
}
