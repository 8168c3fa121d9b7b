//! Synchronous processing: create (or resume) the provider asset and poll it
//! until it settles, the deadline passes or the caller goes away.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reelay_core::models::{
    AssetCreationPayload, JobType, ProcessingJob, VideoRecord, VideoStatus,
};
use reelay_core::{AppError, Config};
use reelay_db::{submit_job, JobStore, NewJob, RecordStore};
use reelay_provider::{AssetSnapshot, ProcessingProvider, ProviderError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::reconcile::Reconciler;

const TRANSIENT_BACKOFF_BASE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    pub transient_retries: u32,
    pub storage_public_base_url: String,
    /// Attempts granted to the background job when creation is handed off.
    pub background_max_attempts: i32,
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.sync_poll_interval_secs()),
            transient_retries: config.provider_transient_retries(),
            storage_public_base_url: config.storage_public_base_url().to_string(),
            background_max_attempts: config.job_queue_max_retries(),
        }
    }
}

/// Public URL the provider ingests for `storage_key`.
pub fn input_url(storage_public_base_url: &str, storage_key: &str) -> String {
    format!(
        "{}/{}",
        storage_public_base_url.trim_end_matches('/'),
        storage_key.trim_start_matches('/')
    )
}

#[derive(Debug, Clone)]
pub enum CoordinatorOutcome {
    Ready(VideoRecord),
    /// The provider reported a terminal error. `degraded` records were kept alive
    /// on a fallback thumbnail instead of being marked failed.
    Errored { record: VideoRecord, degraded: bool },
    /// The deadline passed; callbacks finish the job.
    StillProcessing(VideoRecord),
    Cancelled,
}

enum CallFailure {
    Provider(ProviderError),
    Deadline,
    Cancelled,
}

impl CallFailure {
    fn describe(&self) -> String {
        match self {
            CallFailure::Provider(e) => e.to_string(),
            CallFailure::Deadline => "deadline elapsed before the provider answered".to_string(),
            CallFailure::Cancelled => "request cancelled".to_string(),
        }
    }
}

pub struct SyncCoordinator {
    reconciler: Reconciler,
    jobs: Arc<dyn JobStore>,
    config: CoordinatorConfig,
}

impl SyncCoordinator {
    pub fn new(reconciler: Reconciler, jobs: Arc<dyn JobStore>, config: CoordinatorConfig) -> Self {
        Self {
            reconciler,
            jobs,
            config,
        }
    }

    fn records(&self) -> &RecordStore {
        self.reconciler.records()
    }

    fn provider(&self) -> &Arc<dyn ProcessingProvider> {
        self.reconciler.provider()
    }

    /// Drive `record` to a settled state within `deadline`.
    ///
    /// Every provider call is bounded by the time left, so the call returns
    /// no later than the deadline plus bookkeeping writes.
    #[tracing::instrument(skip(self, record, cancel), fields(video.id = %record.id, deadline_secs = deadline.as_secs()))]
    pub async fn run(
        &self,
        record: &VideoRecord,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<CoordinatorOutcome, AppError> {
        let deadline_at = Instant::now() + deadline;
        let job = self
            .jobs
            .create_job(NewJob::inline(record.id, JobType::AssetCreation))
            .await?;

        let asset_id = match &record.external_asset_id {
            Some(asset_id) => {
                tracing::debug!(video_id = %record.id, external_asset_id = %asset_id, "Resuming existing provider asset");
                asset_id.clone()
            }
            None => match self.create_asset(record, deadline_at, &cancel).await {
                Ok(asset) => {
                    self.records()
                        .attach_external_asset(record.id, &asset.id, asset.playback_id())
                        .await?;
                    asset.id
                }
                Err(CallFailure::Provider(e)) if !e.is_transient() => {
                    let reason = e.to_string();
                    self.jobs.mark_failed(job.id, &reason).await?;
                    let (record, degraded) =
                        self.reconciler.apply_errored(record, &reason).await?;
                    return Ok(CoordinatorOutcome::Errored { record, degraded });
                }
                Err(failure) => return self.hand_off_creation(record, &job, failure).await,
            },
        };

        loop {
            let provider = self.provider().clone();
            let polled = self
                .call(deadline_at, &cancel, "get_asset", || provider.get_asset(&asset_id))
                .await;

            match polled {
                Ok(snapshot) if snapshot.is_ready() => {
                    return self.finish_ready(record, &job, &snapshot).await;
                }
                Ok(snapshot) if snapshot.is_errored() => {
                    return self.finish_errored(record, &job, &snapshot).await;
                }
                Ok(snapshot) => {
                    tracing::debug!(
                        video_id = %record.id,
                        external_asset_id = %asset_id,
                        status = snapshot.status.as_str(),
                        "Asset still processing"
                    );
                }
                Err(CallFailure::Cancelled) => {
                    return self.park(record, &job, &asset_id, true).await;
                }
                Err(CallFailure::Deadline) => break,
                Err(CallFailure::Provider(e)) => {
                    tracing::warn!(
                        video_id = %record.id,
                        external_asset_id = %asset_id,
                        error = %e,
                        "Polling failed, leaving asset to callbacks"
                    );
                    break;
                }
            }

            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.park(record, &job, &asset_id, true).await,
                _ = tokio::time::sleep(self.config.poll_interval.min(remaining)) => {}
            }
            if Instant::now() >= deadline_at {
                break;
            }
        }

        self.park(record, &job, &asset_id, false).await
    }

    async fn create_asset(
        &self,
        record: &VideoRecord,
        deadline_at: Instant,
        cancel: &CancellationToken,
    ) -> Result<AssetSnapshot, CallFailure> {
        let url = input_url(&self.config.storage_public_base_url, &record.storage_key);
        let passthrough = record.id.to_string();
        let provider = self.provider().clone();
        self.call(deadline_at, cancel, "create_asset", || {
            provider.create_asset(&url, &passthrough)
        })
        .await
    }

    /// Run a provider call, retrying transient failures with capped backoff.
    async fn call<T, F, Fut>(
        &self,
        deadline_at: Instant,
        cancel: &CancellationToken,
        operation: &'static str,
        mut op: F,
    ) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CallFailure::Deadline);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
                result = tokio::time::timeout(remaining, op()) => result,
            };

            match result {
                Err(_) => return Err(CallFailure::Deadline),
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() && attempt < self.config.transient_retries => {
                    attempt += 1;
                    let backoff = TRANSIENT_BACKOFF_BASE
                        .saturating_mul(1 << (attempt - 1).min(6))
                        .min(self.config.poll_interval.max(TRANSIENT_BACKOFF_BASE));
                    tracing::warn!(
                        operation,
                        attempt,
                        max_retries = self.config.transient_retries,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    let remaining = deadline_at.saturating_duration_since(Instant::now());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
                        _ = tokio::time::sleep(backoff.min(remaining)) => {}
                    }
                }
                Ok(Err(e)) => return Err(CallFailure::Provider(e)),
            }
        }
    }

    async fn finish_ready(
        &self,
        record: &VideoRecord,
        job: &ProcessingJob,
        snapshot: &AssetSnapshot,
    ) -> Result<CoordinatorOutcome, AppError> {
        let current = self.records().get(record.id).await?;
        let (fresh, _) = self.reconciler.apply_ready(&current, snapshot).await?;
        self.jobs.mark_completed(job.id).await?;

        Ok(match fresh.status {
            VideoStatus::Ready => CoordinatorOutcome::Ready(fresh),
            _ => CoordinatorOutcome::Errored {
                record: fresh,
                degraded: false,
            },
        })
    }

    async fn finish_errored(
        &self,
        record: &VideoRecord,
        job: &ProcessingJob,
        snapshot: &AssetSnapshot,
    ) -> Result<CoordinatorOutcome, AppError> {
        let reason = snapshot.error_summary();
        self.jobs.mark_failed(job.id, &reason).await?;

        let current = self.records().get(record.id).await?;
        let (fresh, degraded) = self.reconciler.apply_errored(&current, &reason).await?;
        if fresh.status == VideoStatus::Ready {
            return Ok(CoordinatorOutcome::Ready(fresh));
        }
        Ok(CoordinatorOutcome::Errored {
            record: fresh,
            degraded,
        })
    }

    /// Leave the asset to callbacks: the job waits for one and the record shows `processing`.
    async fn park(
        &self,
        record: &VideoRecord,
        job: &ProcessingJob,
        asset_id: &str,
        cancelled: bool,
    ) -> Result<CoordinatorOutcome, AppError> {
        self.jobs
            .mark_awaiting_callback(job.id, Some(asset_id))
            .await?;
        let current = self
            .records()
            .transition(record.id, VideoStatus::Processing)
            .await?
            .into_record();

        tracing::info!(
            video_id = %record.id,
            external_asset_id = %asset_id,
            cancelled,
            "Synchronous processing handed over to callbacks"
        );

        if cancelled {
            return Ok(CoordinatorOutcome::Cancelled);
        }
        Ok(match current.status {
            VideoStatus::Ready => CoordinatorOutcome::Ready(current),
            VideoStatus::Failed => CoordinatorOutcome::Errored {
                record: current,
                degraded: false,
            },
            _ => CoordinatorOutcome::StillProcessing(current),
        })
    }

    /// The provider never accepted the asset; queue creation for the worker.
    async fn hand_off_creation(
        &self,
        record: &VideoRecord,
        job: &ProcessingJob,
        failure: CallFailure,
    ) -> Result<CoordinatorOutcome, AppError> {
        let reason = failure.describe();
        self.jobs.mark_failed(job.id, &reason).await?;

        let payload = serde_json::to_value(AssetCreationPayload::default())?;
        let queued = submit_job(
            self.jobs.as_ref(),
            record.id,
            JobType::AssetCreation,
            payload,
            self.config.background_max_attempts,
        )
        .await?;

        // A create call cut off by the deadline may still land at the provider.
        // Its callbacks carry this record id as passthrough and are reported
        // as abandoned assets by the webhook processor.
        tracing::warn!(
            video_id = %record.id,
            job_id = %queued.id,
            reason = %reason,
            possible_abandoned_asset = matches!(failure, CallFailure::Deadline),
            "Asset creation handed off to background queue"
        );

        let current = self
            .records()
            .transition(record.id, VideoStatus::Processing)
            .await?
            .into_record();

        if matches!(failure, CallFailure::Cancelled) {
            return Ok(CoordinatorOutcome::Cancelled);
        }
        Ok(CoordinatorOutcome::StillProcessing(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnail::{ThumbnailChain, ThumbnailChainConfig};
    use reelay_core::models::{JobStatus, MetadataSource, ThumbnailTier};
    use reelay_db::memory::{sample_new_video, InMemoryJobStore, InMemoryVideoStore};
    use reelay_provider::fake::{errored_asset, preparing_asset, ready_asset, FakeProvider};

    struct Harness {
        videos: Arc<InMemoryVideoStore>,
        jobs: Arc<InMemoryJobStore>,
        provider: Arc<FakeProvider>,
        records: RecordStore,
        coordinator: SyncCoordinator,
    }

    fn harness(synthesized_enabled: bool) -> Harness {
        let videos = Arc::new(InMemoryVideoStore::new());
        let jobs = Arc::new(InMemoryJobStore::new());
        let provider = Arc::new(FakeProvider::new());
        let records = RecordStore::new(videos.clone(), 2);
        let thumbnails = Arc::new(ThumbnailChain::new(
            provider.clone(),
            records.clone(),
            ThumbnailChainConfig {
                tier_timeout: Duration::from_secs(5),
                placeholder_url: "/static/video-placeholder.svg".to_string(),
                synthesized_enabled,
            },
        ));
        let reconciler = Reconciler::new(records.clone(), provider.clone(), thumbnails);
        let coordinator = SyncCoordinator::new(
            reconciler,
            jobs.clone(),
            CoordinatorConfig {
                poll_interval: Duration::from_secs(5),
                transient_retries: 3,
                storage_public_base_url: "https://uploads.test".to_string(),
                background_max_attempts: 3,
            },
        );
        Harness {
            videos,
            jobs,
            provider,
            records,
            coordinator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_polling_merges_authoritative_values() {
        let h = harness(true);
        let record = h.records.create(&sample_new_video(None)).await.unwrap();
        h.provider.script_polls(vec![
            Ok(preparing_asset("asset-1", "playback-1")),
            Ok(preparing_asset("asset-1", "playback-1")),
            Ok(ready_asset("asset-1", "playback-1")),
        ]);

        let outcome = h
            .coordinator
            .run(&record, Duration::from_secs(90), CancellationToken::new())
            .await
            .unwrap();

        let CoordinatorOutcome::Ready(ready) = outcome else {
            panic!("expected ready, got {:?}", outcome);
        };
        assert_eq!(ready.status, VideoStatus::Ready);
        assert!(ready.ready_at.is_some());
        assert_eq!(ready.metadata_source, MetadataSource::Authoritative);
        assert_eq!(ready.width, Some(1920));
        assert_eq!(ready.external_asset_id.as_deref(), Some("asset-1"));
        assert_eq!(ready.thumbnail_tier, Some(ThumbnailTier::ProviderFrame));
        assert_eq!(
            ready.streaming_url.as_deref(),
            Some("https://stream.test/playback-1.m3u8")
        );
        assert_eq!(h.provider.poll_calls(), 3);

        let jobs = h.jobs.of_type(record.id, JobType::AssetCreation);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_respected_when_provider_never_finishes() {
        let h = harness(true);
        let record = h.records.create(&sample_new_video(None)).await.unwrap();

        let started = Instant::now();
        let outcome = h
            .coordinator
            .run(&record, Duration::from_secs(20), CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed <= Duration::from_secs(21), "took {:?}", elapsed);
        let CoordinatorOutcome::StillProcessing(current) = outcome else {
            panic!("expected still processing, got {:?}", outcome);
        };
        assert_eq!(current.status, VideoStatus::Processing);
        assert!(h.provider.poll_calls() >= 4);

        let job = &h.jobs.of_type(record.id, JobType::AssetCreation)[0];
        assert_eq!(job.status, JobStatus::AwaitingCallback);
        assert_eq!(job.external_job_id.as_deref(), Some("asset-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_with_fallback_thumbnail_degrades() {
        let h = harness(true);
        let record = h.records.create(&sample_new_video(None)).await.unwrap();
        h.provider.script_polls(vec![Ok(errored_asset("asset-1"))]);

        let outcome = h
            .coordinator
            .run(&record, Duration::from_secs(90), CancellationToken::new())
            .await
            .unwrap();

        let CoordinatorOutcome::Errored { record: current, degraded } = outcome else {
            panic!("expected errored, got {:?}", outcome);
        };
        assert!(degraded);
        assert_ne!(current.status, VideoStatus::Failed);
        assert!(current.is_degraded());
        assert_eq!(current.thumbnail_tier, Some(ThumbnailTier::Synthesized));

        let job = &h.jobs.of_type(record.id, JobType::AssetCreation)[0];
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_without_fallback_fails_record() {
        let h = harness(false);
        let record = h.records.create(&sample_new_video(None)).await.unwrap();
        h.provider.script_polls(vec![Ok(errored_asset("asset-1"))]);

        let outcome = h
            .coordinator
            .run(&record, Duration::from_secs(90), CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CoordinatorOutcome::Errored { degraded: false, ref record } if record.status == VideoStatus::Failed
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_errors_are_retried() {
        let h = harness(true);
        let record = h.records.create(&sample_new_video(None)).await.unwrap();
        h.provider.script_polls(vec![
            Err(ProviderError::Transient("502".to_string())),
            Err(ProviderError::Transient("timeout".to_string())),
            Ok(ready_asset("asset-1", "playback-1")),
        ]);

        let outcome = h
            .coordinator
            .run(&record, Duration::from_secs(90), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CoordinatorOutcome::Ready(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_existing_asset_without_creating_another() {
        let h = harness(true);
        let record = h
            .records
            .create(&sample_new_video(Some("asset-7")))
            .await
            .unwrap();
        h.provider.set_asset(ready_asset("asset-7", "pb-7"));

        let outcome = h
            .coordinator
            .run(&record, Duration::from_secs(90), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, CoordinatorOutcome::Ready(_)));
        assert_eq!(h.provider.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_hands_creation_to_queue() {
        let h = harness(true);
        let record = h.records.create(&sample_new_video(None)).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h
            .coordinator
            .run(&record, Duration::from_secs(90), cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, CoordinatorOutcome::Cancelled));
        assert_eq!(h.provider.create_calls(), 0);

        let jobs = h.jobs.of_type(record.id, JobType::AssetCreation);
        assert_eq!(jobs.len(), 2);
        let queued = jobs
            .iter()
            .find(|j| j.status == JobStatus::Pending)
            .expect("handed-off job");
        assert_eq!(queued.max_attempts, 3);
        assert!(queued.try_payload_as::<AssetCreationPayload>().is_ok());
        assert_eq!(
            h.videos.snapshot(record.id).unwrap().status,
            VideoStatus::Processing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_creation_counts_as_provider_error() {
        let h = harness(true);
        let record = h.records.create(&sample_new_video(None)).await.unwrap();
        h.provider.script_creates(vec![Err(ProviderError::Rejected {
            status: 400,
            message: "unsupported input".to_string(),
        })]);

        let outcome = h
            .coordinator
            .run(&record, Duration::from_secs(90), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CoordinatorOutcome::Errored { degraded: true, .. }
        ));
    }
}
