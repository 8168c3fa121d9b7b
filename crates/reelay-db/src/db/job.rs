use anyhow::{Context, Result};
use async_trait::async_trait;
use reelay_core::models::{JobStatus, JobType, ProcessingJob};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Channel used to wake the worker pool when a pending job is inserted.
pub const NEW_JOB_CHANNEL: &str = "reelay_new_job";

macro_rules! job_columns {
    () => {
        r#"
            id, video_id, job_type, status, external_job_id, payload,
            attempts, max_attempts, last_error,
            scheduled_at, started_at, completed_at, created_at, updated_at
        "#
    };
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub video_id: Uuid,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub max_attempts: i32,
    /// `Pending` rows are picked up by the worker pool; `Running` rows are
    /// driven inline by their creator.
    pub status: JobStatus,
}

impl NewJob {
    pub fn queued(video_id: Uuid, job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            video_id,
            job_type,
            payload,
            max_attempts: 3,
            status: JobStatus::Pending,
        }
    }

    pub fn inline(video_id: Uuid, job_type: JobType) -> Self {
        Self {
            video_id,
            job_type,
            payload: serde_json::json!({}),
            max_attempts: 1,
            status: JobStatus::Running,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Insert a pending job for the worker pool. The job queue, the synchronous
/// hand-off and ready follow-ups all submit through here.
#[tracing::instrument(skip(jobs, payload), fields(video.id = %video_id, job.type = %job_type))]
pub async fn submit_job(
    jobs: &dyn JobStore,
    video_id: Uuid,
    job_type: JobType,
    payload: serde_json::Value,
    max_attempts: i32,
) -> Result<ProcessingJob> {
    let job = jobs
        .create_job(NewJob::queued(video_id, job_type, payload).with_max_attempts(max_attempts))
        .await
        .context("Failed to create job in repository")?;
    tracing::info!(
        job_id = %job.id,
        video_id = %video_id,
        job_type = %job_type,
        "Job submitted to queue"
    );
    Ok(job)
}

/// How an open job is closed when a callback arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSettlement {
    Completed,
    Failed(String),
}

/// Persistence for `ProcessingJob` rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: NewJob) -> Result<ProcessingJob>;

    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessingJob>>;

    async fn list_for_video(&self, video_id: Uuid) -> Result<Vec<ProcessingJob>>;

    /// Claim the oldest due pending job and mark it running.
    async fn claim_next_job(&self) -> Result<Option<ProcessingJob>>;

    async fn mark_awaiting_callback(
        &self,
        id: Uuid,
        external_job_id: Option<&str>,
    ) -> Result<ProcessingJob>;

    async fn mark_completed(&self, id: Uuid) -> Result<ProcessingJob>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<ProcessingJob>;

    /// Put a job back to pending after a failed attempt, due in `delay_secs`.
    async fn schedule_retry(&self, id: Uuid, error: &str, delay_secs: i64)
        -> Result<ProcessingJob>;

    /// Close every non-terminal job of `job_type` for `video_id`. Returns the number closed.
    async fn settle_open_jobs(
        &self,
        video_id: Uuid,
        job_type: JobType,
        settlement: JobSettlement,
    ) -> Result<u64>;

    /// Close the open job carrying `external_job_id`, if any.
    async fn settle_by_external_job_id(
        &self,
        external_job_id: &str,
        settlement: JobSettlement,
    ) -> Result<Option<ProcessingJob>>;

    /// Fail running or awaiting jobs that have not moved for `grace_secs`.
    async fn reap_stale_jobs(&self, grace_secs: i64) -> Result<u64>;
}

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn settlement_parts(settlement: &JobSettlement) -> (&'static str, Option<&str>) {
    match settlement {
        JobSettlement::Completed => ("completed", None),
        JobSettlement::Failed(error) => ("failed", Some(error.as_str())),
    }
}

#[async_trait]
impl JobStore for JobRepository {
    #[tracing::instrument(skip(self, job), fields(db.table = "processing_jobs", db.operation = "insert", job.kind = %job.job_type))]
    async fn create_job(&self, job: NewJob) -> Result<ProcessingJob> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for job creation")?;

        let created: ProcessingJob = sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            r#"
            INSERT INTO processing_jobs (
                id, video_id, job_type, status, payload, max_attempts,
                started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $4::text = 'running' THEN NOW() ELSE NULL END)
            RETURNING "#,
            job_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(job.video_id)
        .bind(job.job_type.to_string())
        .bind(job.status.to_string())
        .bind(&job.payload)
        .bind(job.max_attempts)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert processing job")?;

        // Workers fall back to polling when the notification cannot be sent
        if created.status == JobStatus::Pending {
            if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
                .bind(NEW_JOB_CHANNEL)
                .execute(&mut *tx)
                .await
            {
                tracing::warn!(
                    error = %e,
                    job_id = %created.id,
                    "Failed to send pg_notify for new job, workers will discover it via polling"
                );
            }
        }

        tx.commit()
            .await
            .context("Failed to commit job creation")?;

        tracing::info!(
            job_id = %created.id,
            video_id = %created.video_id,
            job_type = %created.job_type,
            status = %created.status,
            "Processing job created"
        );

        Ok(created)
    }

    #[tracing::instrument(skip(self), fields(db.table = "processing_jobs", db.operation = "select"))]
    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessingJob>> {
        sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM processing_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch processing job")
    }

    #[tracing::instrument(skip(self), fields(db.table = "processing_jobs", db.operation = "select"))]
    async fn list_for_video(&self, video_id: Uuid) -> Result<Vec<ProcessingJob>> {
        sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM processing_jobs WHERE video_id = $1 ORDER BY created_at ASC"
        ))
        .bind(video_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list processing jobs")
    }

    #[tracing::instrument(skip(self), fields(db.table = "processing_jobs", db.operation = "claim"))]
    async fn claim_next_job(&self) -> Result<Option<ProcessingJob>> {
        let claimed = sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            r#"
            UPDATE processing_jobs
            SET status = 'running',
                attempts = attempts + 1,
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM processing_jobs
                WHERE status = 'pending' AND scheduled_at <= NOW()
                ORDER BY scheduled_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING "#,
            job_columns!()
        ))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim next processing job")?;

        if let Some(job) = &claimed {
            tracing::debug!(
                job_id = %job.id,
                video_id = %job.video_id,
                job_type = %job.job_type,
                attempt = job.attempts,
                "Job claimed"
            );
        }

        Ok(claimed)
    }

    #[tracing::instrument(skip(self), fields(db.table = "processing_jobs", db.operation = "update"))]
    async fn mark_awaiting_callback(
        &self,
        id: Uuid,
        external_job_id: Option<&str>,
    ) -> Result<ProcessingJob> {
        sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            r#"
            UPDATE processing_jobs
            SET status = 'awaiting_callback',
                external_job_id = COALESCE($2, external_job_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            job_columns!()
        ))
        .bind(id)
        .bind(external_job_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark job as awaiting callback")
    }

    #[tracing::instrument(skip(self), fields(db.table = "processing_jobs", db.operation = "update"))]
    async fn mark_completed(&self, id: Uuid) -> Result<ProcessingJob> {
        let job = sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            r#"
            UPDATE processing_jobs
            SET status = 'completed',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            job_columns!()
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark job as completed")?;

        tracing::info!(
            job_id = %id,
            video_id = %job.video_id,
            job_type = %job.job_type,
            "Job completed"
        );

        Ok(job)
    }

    #[tracing::instrument(skip(self, error), fields(db.table = "processing_jobs", db.operation = "update"))]
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<ProcessingJob> {
        let job = sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            r#"
            UPDATE processing_jobs
            SET status = 'failed',
                last_error = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            job_columns!()
        ))
        .bind(id)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark job as failed")?;

        tracing::warn!(
            job_id = %id,
            video_id = %job.video_id,
            job_type = %job.job_type,
            attempts = job.attempts,
            error = %error,
            "Job failed"
        );

        Ok(job)
    }

    #[tracing::instrument(skip(self, error), fields(db.table = "processing_jobs", db.operation = "update"))]
    async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        delay_secs: i64,
    ) -> Result<ProcessingJob> {
        let job = sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            r#"
            UPDATE processing_jobs
            SET status = 'pending',
                last_error = $2,
                started_at = NULL,
                scheduled_at = NOW() + ($3 * interval '1 second'),
                updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            job_columns!()
        ))
        .bind(id)
        .bind(error)
        .bind(delay_secs as f64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to schedule job retry")?;

        tracing::info!(
            job_id = %id,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            delay_secs,
            "Job retry scheduled"
        );

        Ok(job)
    }

    #[tracing::instrument(skip(self), fields(db.table = "processing_jobs", db.operation = "update"))]
    async fn settle_open_jobs(
        &self,
        video_id: Uuid,
        job_type: JobType,
        settlement: JobSettlement,
    ) -> Result<u64> {
        let (status, error) = settlement_parts(&settlement);
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = $3,
                last_error = COALESCE($4, last_error),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE video_id = $1
                AND job_type = $2
                AND status IN ('pending', 'running', 'awaiting_callback')
            "#,
        )
        .bind(video_id)
        .bind(job_type.to_string())
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to settle open jobs")?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(db.table = "processing_jobs", db.operation = "update"))]
    async fn settle_by_external_job_id(
        &self,
        external_job_id: &str,
        settlement: JobSettlement,
    ) -> Result<Option<ProcessingJob>> {
        let (status, error) = settlement_parts(&settlement);
        sqlx::query_as::<Postgres, ProcessingJob>(concat!(
            r#"
            UPDATE processing_jobs
            SET status = $2,
                last_error = COALESCE($3, last_error),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE external_job_id = $1
                AND status IN ('pending', 'running', 'awaiting_callback')
            RETURNING "#,
            job_columns!()
        ))
        .bind(external_job_id)
        .bind(status)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to settle job by external id")
    }

    #[tracing::instrument(skip(self), fields(db.table = "processing_jobs", db.operation = "reap"))]
    async fn reap_stale_jobs(&self, grace_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = 'failed',
                last_error = 'Timed out waiting for completion',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status IN ('running', 'awaiting_callback')
                AND updated_at < NOW() - ($1 * interval '1 second')
            "#,
        )
        .bind(grace_secs as f64)
        .execute(&self.pool)
        .await
        .context("Failed to reap stale jobs")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, grace_secs, "Reaped stale processing jobs");
        }

        Ok(count)
    }
}
