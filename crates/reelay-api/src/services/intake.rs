//! Upload intake: record creation, mode dispatch and background job fan-out.

use std::sync::Arc;
use std::time::Duration;

use reelay_core::models::{
    AssetCreationPayload, JobType, MetadataSource, NewVideoRecord, ProcessingMode,
    ThumbnailRegenerationPayload, ThumbnailTier, VideoRecord, VideoStatus, Visibility,
};
use reelay_core::{AppError, Config};
use reelay_db::RecordStore;
use reelay_processing::{
    estimate, select_mode, CoordinatorOutcome, ModeSelectorConfig, SyncCoordinator,
    ThumbnailChain, ThumbnailInput,
};
use reelay_worker::JobQueue;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_video_mime(mime_type: &str) -> Result<(), ValidationError> {
    if mime_type.trim().to_lowercase().starts_with("video/") {
        Ok(())
    } else {
        Err(ValidationError::new("mime_type_not_video"))
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct IntakeRequest {
    /// Key of the already uploaded object in storage.
    #[validate(length(min = 1, max = 1024))]
    pub storage_key: String,
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[validate(range(min = 1))]
    pub size_bytes: i64,
    #[validate(custom(function = "validate_video_mime"))]
    pub mime_type: String,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
    /// Provider asset the client uploaded to directly. Resubmitting the same id returns the same record.
    #[validate(length(min = 1, max = 255))]
    pub external_asset_id: Option<String>,
    /// Frame captured by the client, as a URL or data URI.
    #[validate(length(min = 1, max = 524288))]
    pub client_thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntakeResponse {
    pub id: Uuid,
    pub status: VideoStatus,
    /// The provider failed but the record is kept on a fallback thumbnail.
    pub degraded: bool,
    pub thumbnail_ref: String,
    pub thumbnail_tier: ThumbnailTier,
    pub streaming_url: Option<String>,
    pub estimated_duration: Option<f64>,
    pub metadata_source: MetadataSource,
    pub processing_mode: ProcessingMode,
}

#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub response: IntakeResponse,
    /// `false` when an existing record for the same external asset was returned.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub mode: ModeSelectorConfig,
    pub sync_deadline: Duration,
}

impl IntakeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: ModeSelectorConfig::from_config(config),
            sync_deadline: Duration::from_secs(config.sync_deadline_secs()),
        }
    }
}

#[derive(Clone)]
pub struct IntakeService {
    records: RecordStore,
    thumbnails: Arc<ThumbnailChain>,
    coordinator: Arc<SyncCoordinator>,
    job_queue: JobQueue,
    config: IntakeConfig,
}

impl IntakeService {
    pub fn new(
        records: RecordStore,
        thumbnails: Arc<ThumbnailChain>,
        coordinator: Arc<SyncCoordinator>,
        job_queue: JobQueue,
        config: IntakeConfig,
    ) -> Self {
        Self {
            records,
            thumbnails,
            coordinator,
            job_queue,
            config,
        }
    }

    /// Register an uploaded video and start processing it.
    ///
    /// The record is persisted before any provider call; a storage failure
    /// fails the request instead of being papered over.
    #[tracing::instrument(
        skip(self, request),
        fields(storage_key = %request.storage_key, size_bytes = request.size_bytes, video.id = tracing::field::Empty)
    )]
    pub async fn intake(&self, request: IntakeRequest) -> Result<IntakeOutcome, AppError> {
        let mode = select_mode(
            request.size_bytes.max(0) as u64,
            &request.mime_type,
            &self.config.mode,
        );
        let id = Uuid::new_v4();
        tracing::Span::current().record("video.id", id.to_string());

        // Provider frames need a provider call, which waits until the record exists.
        let client_thumbnail = request.client_thumbnail.clone();
        let thumbnail = self
            .thumbnails
            .resolve(&ThumbnailInput {
                video_id: id,
                external_asset_id: None,
                playback_id: None,
                asset_ready: false,
                client_capture: client_thumbnail.clone(),
            })
            .await;

        let new = NewVideoRecord {
            id,
            estimate: estimate(request.size_bytes, &request.mime_type),
            storage_key: request.storage_key,
            original_filename: request.filename,
            size_bytes: request.size_bytes,
            mime_type: request.mime_type,
            title: request.title,
            description: request.description,
            category: request.category,
            tags: request.tags,
            visibility: request.visibility,
            processing_mode: mode,
            external_asset_id: request.external_asset_id,
            thumbnail,
        };

        let (record, created) = if new.external_asset_id.is_some() {
            self.records.find_or_create_by_external_asset_id(&new).await?
        } else {
            (self.records.create(&new).await?, true)
        };

        if !created {
            tracing::info!(
                video_id = %record.id,
                external_asset_id = ?record.external_asset_id,
                "Intake matched an existing record"
            );
            return Ok(IntakeOutcome {
                response: self.respond(&record),
                created: false,
            });
        }

        let record = if record.external_asset_id.is_some() {
            self.upgrade_from_provider_frame(record, client_thumbnail.clone())
                .await
        } else {
            record
        };

        if !record.has_usable_thumbnail() {
            let payload = ThumbnailRegenerationPayload { client_thumbnail };
            self.job_queue
                .submit(
                    record.id,
                    JobType::ThumbnailRegeneration,
                    serde_json::json!(payload),
                )
                .await?;
        }

        let record = match mode {
            ProcessingMode::Synchronous => self.run_synchronously(record).await?,
            ProcessingMode::Asynchronous => {
                self.job_queue
                    .submit(
                        record.id,
                        JobType::AssetCreation,
                        serde_json::json!(AssetCreationPayload::default()),
                    )
                    .await?;
                self.records
                    .transition(record.id, VideoStatus::Processing)
                    .await?
                    .into_record()
            }
        };

        tracing::info!(
            video_id = %record.id,
            mode = %mode,
            status = %record.status,
            thumbnail_tier = ?record.thumbnail_tier,
            "Video accepted"
        );

        Ok(IntakeOutcome {
            response: self.respond(&record),
            created: true,
        })
    }

    /// Direct uploads may already be ready at the provider. Failing to store
    /// the upgrade keeps the thumbnail the record was created with.
    async fn upgrade_from_provider_frame(
        &self,
        record: VideoRecord,
        client_thumbnail: Option<String>,
    ) -> VideoRecord {
        let input = ThumbnailInput::for_record(&record).with_client_capture(client_thumbnail);
        match self.thumbnails.resolve_and_store(&record, &input).await {
            Ok(resolution) if resolution.upgraded => {
                self.records.get(record.id).await.unwrap_or(record)
            }
            Ok(_) => record,
            Err(e) => {
                tracing::warn!(video_id = %record.id, error = %e, "Failed to store provider frame thumbnail");
                record
            }
        }
    }

    /// Run the coordinator on its own task. If the request future is dropped
    /// (client disconnect), the drop guard cancels it and the coordinator
    /// hands the asset over to callbacks instead of being cut off mid-write.
    async fn run_synchronously(&self, record: VideoRecord) -> Result<VideoRecord, AppError> {
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        let video_id = record.id;
        let coordinator = self.coordinator.clone();
        let deadline = self.config.sync_deadline;
        let outcome = tokio::spawn(async move { coordinator.run(&record, deadline, cancel).await })
            .await
            .map_err(|e| AppError::Internal(format!("Synchronous processing task failed: {}", e)))??;

        match outcome {
            CoordinatorOutcome::Ready(record) => Ok(record),
            CoordinatorOutcome::StillProcessing(record) => {
                tracing::info!(video_id = %video_id, "Deadline reached, callbacks will finish processing");
                Ok(record)
            }
            CoordinatorOutcome::Errored { record, degraded } => {
                tracing::warn!(
                    video_id = %video_id,
                    degraded,
                    status = %record.status,
                    "Provider reported an error during synchronous processing"
                );
                Ok(record)
            }
            CoordinatorOutcome::Cancelled => self.records.get(video_id).await,
        }
    }

    /// Operator retry of a failed record: back to `pending` and a fresh asset creation job.
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, id: Uuid) -> Result<VideoRecord, AppError> {
        let record = self.records.reset_for_retry(id).await?;
        let job = self
            .job_queue
            .submit(
                record.id,
                JobType::AssetCreation,
                serde_json::json!(AssetCreationPayload::default()),
            )
            .await?;
        tracing::info!(video_id = %id, job_id = %job.id, "Operator retry dispatched");
        Ok(record)
    }

    fn respond(&self, record: &VideoRecord) -> IntakeResponse {
        let thumbnail = record
            .thumbnail()
            .unwrap_or_else(|| self.thumbnails.placeholder());
        IntakeResponse {
            id: record.id,
            status: record.status,
            degraded: record.is_degraded(),
            thumbnail_ref: thumbnail.url,
            thumbnail_tier: thumbnail.tier,
            streaming_url: record.streaming_url.clone(),
            estimated_duration: record.duration_seconds,
            metadata_source: record.metadata_source,
            processing_mode: record.processing_mode,
        }
    }
}
