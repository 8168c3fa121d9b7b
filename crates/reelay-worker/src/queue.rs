//! Job queue: worker pool, LISTEN/NOTIFY or polling, retry, maintenance and submission.
//!
//! Shutdown: [`JobQueue::shutdown`] signals the pool to stop claiming; in-flight
//! jobs keep running until they finish or time out.

use anyhow::{Context, Result};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use reelay_core::models::{JobType, ProcessingJob};
use reelay_core::{is_unrecoverable, Config};
use reelay_db::{submit_job, JobStore, WebhookLedger, NEW_JOB_CHANNEL};

use crate::context::{JobHandlerContext, JobOutcome};

/// Upper bound for the delay before a failed job is retried.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

#[inline]
pub(crate) fn compute_retry_backoff_seconds(attempts: i32) -> u64 {
    2_u64
        .checked_pow(attempts.max(0) as u32)
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
    pub max_retries: i32,
    /// Interval between maintenance runs (stale job reaper and ledger janitor). Zero disables them.
    pub stale_job_reap_interval_secs: u64,
    pub stale_job_grace_period_secs: i64,
    pub ledger_retention_days: i64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            timeout_secs: 600,
            max_retries: 3,
            stale_job_reap_interval_secs: 60,
            stale_job_grace_period_secs: 3600,
            ledger_retention_days: 7,
        }
    }
}

impl JobQueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.job_queue_max_workers(),
            poll_interval_ms: config.job_queue_poll_interval_ms(),
            timeout_secs: config.job_queue_timeout_secs(),
            max_retries: config.job_queue_max_retries(),
            stale_job_reap_interval_secs: config.stale_job_reap_interval_secs(),
            stale_job_grace_period_secs: config.stale_job_grace_period_secs(),
            ledger_retention_days: config.webhook_ledger_retention_days(),
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    jobs: Arc<dyn JobStore>,
    config: JobQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl JobQueue {
    /// Create a queue and spawn its worker pool.
    ///
    /// With a `pool` the worker also LISTENs for new-job notifications and
    /// wakes immediately instead of waiting for the next poll. With a `ledger`
    /// the maintenance task purges expired webhook ledger rows.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Option<Arc<dyn WebhookLedger>>,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let jobs_clone = jobs.clone();
        let config_clone = config.clone();
        tokio::spawn(async move {
            Self::worker_pool(jobs_clone, ledger, config_clone, context, shutdown_rx, pool).await;
        });

        Self {
            jobs,
            config,
            shutdown_tx,
        }
    }

    /// A queue that only writes rows. Jobs submitted here are picked up by
    /// whichever worker pool shares the store.
    pub fn new_no_worker(jobs: Arc<dyn JobStore>, config: JobQueueConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            jobs,
            config,
            shutdown_tx,
        }
    }

    /// Insert a pending job. Its row makes the work observable before any worker runs it.
    #[tracing::instrument(skip(self, payload))]
    pub async fn submit(
        &self,
        video_id: Uuid,
        job_type: JobType,
        payload: serde_json::Value,
    ) -> Result<ProcessingJob> {
        submit_job(
            self.jobs.as_ref(),
            video_id,
            job_type,
            payload,
            self.config.max_retries.max(1),
        )
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                video_id = %video_id,
                job_type = %job_type,
                "Failed to submit job"
            );
            e
        })
    }

    async fn worker_pool(
        jobs: Arc<dyn JobStore>,
        ledger: Option<Arc<dyn WebhookLedger>>,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = pool.is_some(),
            "Job queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        let timeout = Duration::from_secs(config.timeout_secs);

        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(NEW_JOB_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        let (maintenance_shutdown_tx, maintenance_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_job_reap_interval_secs > 0 {
            tokio::spawn(Self::maintenance(
                jobs.clone(),
                ledger,
                config.clone(),
                maintenance_shutdown_rx,
            ));
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = maintenance_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&jobs, &semaphore, &context, timeout).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&jobs, &semaphore, &context, timeout).await;
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    /// Stale job reaper and webhook ledger janitor.
    async fn maintenance(
        jobs: Arc<dyn JobStore>,
        ledger: Option<Arc<dyn WebhookLedger>>,
        config: JobQueueConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(config.stale_job_reap_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match jobs.reap_stale_jobs(config.stale_job_grace_period_secs).await {
                        Ok(0) => {}
                        Ok(reaped) => tracing::warn!(reaped, "Stale jobs failed by reaper"),
                        Err(e) => tracing::error!(error = %e, "Stale job reaper failed"),
                    }
                    if let Some(ledger) = &ledger {
                        match ledger.purge_older_than(config.ledger_retention_days).await {
                            Ok(0) => {}
                            Ok(purged) => tracing::info!(purged, "Expired webhook ledger rows purged"),
                            Err(e) => tracing::error!(error = %e, "Webhook ledger janitor failed"),
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    async fn claim_and_dispatch_one(
        jobs: &Arc<dyn JobStore>,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn JobHandlerContext>,
        timeout: Duration,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match jobs.claim_next_job().await {
            Ok(Some(job)) => {
                let jobs = jobs.clone();
                let ctx = context.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = Self::process_job(job, jobs, ctx, timeout).await {
                        tracing::error!(error = %e, "Job processing failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim job from queue");
            }
        }
    }

    #[tracing::instrument(skip(jobs, context), fields(job.id = %job.id, job.type = %job.job_type, video.id = %job.video_id))]
    async fn process_job(
        job: ProcessingJob,
        jobs: Arc<dyn JobStore>,
        context: Weak<dyn JobHandlerContext>,
        timeout: Duration,
    ) -> Result<()> {
        let ctx = context
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("JobHandlerContext was dropped, cannot process job"))?;

        let error = match tokio::time::timeout(timeout, ctx.dispatch_job(&job)).await {
            Ok(Ok(JobOutcome::Completed)) => {
                jobs.mark_completed(job.id)
                    .await
                    .context("Failed to mark job as completed")?;
                tracing::info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                return Ok(());
            }
            Ok(Ok(JobOutcome::AwaitingCallback { external_job_id })) => {
                jobs.mark_awaiting_callback(job.id, external_job_id.as_deref())
                    .await
                    .context("Failed to mark job as awaiting callback")?;
                tracing::info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    external_job_id = ?external_job_id,
                    "Job handed to provider, awaiting callback"
                );
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!("Job execution timed out after {}s", timeout.as_secs()),
        };

        let unrecoverable = is_unrecoverable(&error);
        tracing::error!(
            job_id = %job.id,
            error = %error,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            unrecoverable,
            "Job execution failed"
        );

        if !unrecoverable && job.can_retry() {
            let backoff_seconds = compute_retry_backoff_seconds(job.attempts);
            tracing::info!(
                job_id = %job.id,
                attempts = job.attempts,
                backoff_seconds,
                "Scheduling job retry"
            );
            jobs.schedule_retry(job.id, &error.to_string(), backoff_seconds as i64)
                .await
                .context("Failed to schedule job retry")?;
            return Ok(());
        }

        jobs.mark_failed(job.id, &error.to_string())
            .await
            .context("Failed to mark job as failed")?;
        Err(error)
    }

    pub async fn shutdown(&self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reelay_core::models::JobStatus;
    use reelay_core::JobError;
    use reelay_db::memory::{InMemoryJobStore, InMemoryWebhookLedger};
    use reelay_db::NewJob;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Outcome per job type: asset creation completes, captions await a
    /// callback, audio fails transiently and thumbnails fail for good.
    #[derive(Default)]
    struct ScriptedContext {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandlerContext for ScriptedContext {
        async fn dispatch_job(self: Arc<Self>, job: &ProcessingJob) -> Result<JobOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match job.job_type {
                JobType::AssetCreation => Ok(JobOutcome::Completed),
                JobType::CaptionGeneration => Ok(JobOutcome::AwaitingCallback {
                    external_job_id: Some("track-1".to_string()),
                }),
                JobType::AudioEnhancement => Err(anyhow::anyhow!("provider unavailable")),
                JobType::ThumbnailRegeneration => {
                    Err(JobError::unrecoverable(anyhow::anyhow!("record gone")).into())
                }
            }
        }
    }

    fn test_config() -> JobQueueConfig {
        JobQueueConfig {
            max_workers: 2,
            poll_interval_ms: 5,
            stale_job_reap_interval_secs: 0,
            ..Default::default()
        }
    }

    async fn wait_for<F>(store: &InMemoryJobStore, id: Uuid, done: F) -> ProcessingJob
    where
        F: Fn(&ProcessingJob) -> bool,
    {
        for _ in 0..400 {
            if let Some(job) = store.all().into_iter().find(|j| j.id == id) {
                if done(&job) {
                    return job;
                }
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached the expected state", id);
    }

    async fn run(job_type: JobType) -> (ProcessingJob, Arc<ScriptedContext>) {
        let store = Arc::new(InMemoryJobStore::new());
        let ctx = Arc::new(ScriptedContext::default());
        let ctx_dyn: Arc<dyn JobHandlerContext> = ctx.clone();
        let queue = JobQueue::new(
            store.clone(),
            None,
            test_config(),
            Arc::downgrade(&ctx_dyn),
            None,
        );

        let submitted = queue
            .submit(Uuid::new_v4(), job_type, serde_json::json!({}))
            .await
            .unwrap();
        let job = wait_for(&store, submitted.id, |j| {
            j.status != JobStatus::Pending || j.last_error.is_some()
        })
        .await;
        let job = if job.status == JobStatus::Running {
            wait_for(&store, submitted.id, |j| j.status != JobStatus::Running).await
        } else {
            job
        };
        queue.shutdown().await;
        drop(ctx_dyn);
        (job, ctx)
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(3), 8);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(64), MAX_RETRY_BACKOFF_SECS);
    }

    #[tokio::test]
    async fn test_completed_job_is_marked_completed() {
        let (job, ctx) = run(JobType::AssetCreation).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(ctx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_accepted_job_awaits_callback() {
        let (job, _) = run(JobType::CaptionGeneration).await;
        assert_eq!(job.status, JobStatus::AwaitingCallback);
        assert_eq!(job.external_job_id.as_deref(), Some("track-1"));
    }

    #[tokio::test]
    async fn test_recoverable_failure_is_rescheduled() {
        let (job, _) = run(JobType::AudioEnhancement).await;
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.last_error.as_deref(), Some("provider unavailable"));
        assert!(job.scheduled_at > job.created_at);
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_fails_without_retry() {
        let (job, ctx) = run(JobType::ThumbnailRegeneration).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("record gone"));
        assert_eq!(ctx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_maintenance_reaps_stale_jobs_and_purges_ledger() {
        let store = Arc::new(InMemoryJobStore::new());
        let ledger = Arc::new(InMemoryWebhookLedger::new());
        let stale = store
            .create_job(NewJob::inline(Uuid::new_v4(), JobType::AssetCreation))
            .await
            .unwrap();
        store.age(stale.id, 7200);
        ledger
            .record_delivery("video.asset.ready", "asset-1", "hash")
            .await
            .unwrap();
        ledger.age_all(30);

        let ctx: Arc<dyn JobHandlerContext> = Arc::new(ScriptedContext::default());
        let queue = JobQueue::new(
            store.clone(),
            Some(ledger.clone()),
            JobQueueConfig {
                stale_job_reap_interval_secs: 1,
                ..test_config()
            },
            Arc::downgrade(&ctx),
            None,
        );

        let reaped = wait_for(&store, stale.id, |j| j.status == JobStatus::Failed).await;
        assert!(reaped.last_error.is_some());
        for _ in 0..200 {
            if ledger.is_empty() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(ledger.is_empty());
        queue.shutdown().await;
    }
}
