//! In-memory store implementations for tests.
//!
//! They mirror the conditional semantics of the Postgres repositories
//! (unique external asset ids, guarded status edges, tier-ranked thumbnail
//! upgrades) and expose a few knobs to simulate races and outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reelay_core::models::{
    AuthoritativeMetadata, EstimatedMetadata, JobStatus, JobType, MetadataSource, NewVideoRecord,
    ProcessingJob, ProcessingMode, ThumbnailRef, ThumbnailTier, VideoPatch, VideoRecord,
    VideoStatus, Visibility, WebhookEvent, WebhookOutcome,
};
use reelay_core::AppError;
use uuid::Uuid;

use super::job::{JobSettlement, JobStore, NewJob};
use super::video::{StatusChange, VideoStore};
use super::webhook_ledger::{LedgerEntry, WebhookLedger};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Video {} not found", id))
}

/// A minimal pending record for tests.
pub fn sample_new_video(external_asset_id: Option<&str>) -> NewVideoRecord {
    NewVideoRecord {
        id: Uuid::new_v4(),
        storage_key: "uploads/sample.mp4".to_string(),
        original_filename: "sample.mp4".to_string(),
        size_bytes: 10 * 1024 * 1024,
        mime_type: "video/mp4".to_string(),
        title: "Sample".to_string(),
        description: None,
        category: None,
        tags: Vec::new(),
        visibility: Visibility::Private,
        processing_mode: ProcessingMode::Asynchronous,
        external_asset_id: external_asset_id.map(str::to_string),
        estimate: EstimatedMetadata {
            duration_seconds: 80.0,
            width: 640,
            height: 360,
            aspect_ratio: "16:9".to_string(),
            bitrate: 1_000_000,
        },
        thumbnail: ThumbnailRef::new("https://image.test/placeholder.png", ThumbnailTier::Placeholder),
    }
}

#[derive(Default)]
struct VideoState {
    records: HashMap<Uuid, VideoRecord>,
    hidden_lookups: u32,
    forced_conflicts: u32,
}

#[derive(Default)]
pub struct InMemoryVideoStore {
    state: Mutex<VideoState>,
    insert_calls: AtomicU32,
    unavailable: AtomicBool,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// The next `n` external-id lookups miss, as if reading from a lagging replica.
    pub fn hide_from_next_lookups(&self, n: u32) {
        lock(&self.state).hidden_lookups = n;
    }

    /// The next `n` inserts fail with a uniqueness conflict.
    pub fn force_insert_conflicts(&self, n: u32) {
        lock(&self.state).forced_conflicts = n;
    }

    /// Fail every operation as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current copy of a record, bypassing fault injection.
    pub fn snapshot(&self, id: Uuid) -> Option<VideoRecord> {
        lock(&self.state).records.get(&id).cloned()
    }

    pub fn all(&self) -> Vec<VideoRecord> {
        let mut records: Vec<_> = lock(&self.state).records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Overwrite a stored record directly.
    pub fn put(&self, record: VideoRecord) {
        lock(&self.state).records.insert(record.id, record);
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl VideoStore for InMemoryVideoStore {
    async fn insert(&self, new: &NewVideoRecord) -> Result<VideoRecord, AppError> {
        self.check_available()?;
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = lock(&self.state);
        let duplicate = || {
            AppError::DuplicateExternalAsset(new.external_asset_id.clone().unwrap_or_default())
        };
        if state.forced_conflicts > 0 {
            state.forced_conflicts -= 1;
            return Err(duplicate());
        }
        if let Some(external_id) = &new.external_asset_id {
            if state
                .records
                .values()
                .any(|r| r.external_asset_id.as_ref() == Some(external_id))
            {
                return Err(duplicate());
            }
        }
        if state.records.contains_key(&new.id) {
            return Err(AppError::Internal(format!("Duplicate video id {}", new.id)));
        }

        let now = Utc::now();
        let record = VideoRecord {
            id: new.id,
            storage_key: new.storage_key.clone(),
            original_filename: new.original_filename.clone(),
            size_bytes: new.size_bytes,
            mime_type: new.mime_type.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            category: new.category.clone(),
            tags: new.tags.clone(),
            visibility: new.visibility,
            status: VideoStatus::Pending,
            processing_mode: new.processing_mode,
            external_asset_id: new.external_asset_id.clone(),
            external_playback_id: None,
            external_status: None,
            thumbnail_ref: Some(new.thumbnail.url.clone()),
            thumbnail_tier: Some(new.thumbnail.tier),
            streaming_url: None,
            download_url: None,
            duration_seconds: Some(new.estimate.duration_seconds),
            width: Some(new.estimate.width),
            height: Some(new.estimate.height),
            aspect_ratio: Some(new.estimate.aspect_ratio.clone()),
            bitrate: Some(new.estimate.bitrate),
            metadata_source: MetadataSource::Estimated,
            transcript_text: None,
            captions_ref: None,
            audio_enhanced: None,
            created_at: now,
            updated_at: now,
            ready_at: None,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<VideoRecord>, AppError> {
        self.check_available()?;
        Ok(lock(&self.state).records.get(&id).cloned())
    }

    async fn find_by_external_asset_id(
        &self,
        external_asset_id: &str,
    ) -> Result<Option<VideoRecord>, AppError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        if state.hidden_lookups > 0 {
            state.hidden_lookups -= 1;
            return Ok(None);
        }
        Ok(state
            .records
            .values()
            .find(|r| r.external_asset_id.as_deref() == Some(external_asset_id))
            .cloned())
    }

    async fn attach_external_asset(
        &self,
        id: Uuid,
        external_asset_id: &str,
        external_playback_id: Option<&str>,
    ) -> Result<VideoRecord, AppError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let taken = state.records.values().any(|r| {
            r.id != id && r.external_asset_id.as_deref() == Some(external_asset_id)
        });
        let record = state.records.get_mut(&id).ok_or_else(|| not_found(id))?;
        if record.external_asset_id.is_none() {
            if taken {
                return Err(AppError::DuplicateExternalAsset(external_asset_id.to_string()));
            }
            record.external_asset_id = Some(external_asset_id.to_string());
        }
        if let Some(playback_id) = external_playback_id {
            record.external_playback_id = Some(playback_id.to_string());
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn transition(&self, id: Uuid, target: VideoStatus) -> Result<StatusChange, AppError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let record = state.records.get_mut(&id).ok_or_else(|| not_found(id))?;
        if !record.status.can_transition_to(target) {
            return Ok(StatusChange::from_current(record.clone(), target));
        }
        let now = Utc::now();
        record.status = target;
        if target == VideoStatus::Ready && record.ready_at.is_none() {
            record.ready_at = Some(now);
        }
        record.updated_at = now;
        Ok(StatusChange::Applied(record.clone()))
    }

    async fn mark_ready(
        &self,
        id: Uuid,
        metadata: &AuthoritativeMetadata,
    ) -> Result<StatusChange, AppError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let record = state.records.get_mut(&id).ok_or_else(|| not_found(id))?;
        if !record.status.can_transition_to(VideoStatus::Ready) {
            return Ok(StatusChange::from_current(record.clone(), VideoStatus::Ready));
        }

        let now = Utc::now();
        record.status = VideoStatus::Ready;
        record.ready_at.get_or_insert(now);
        if metadata.duration_seconds.is_some() || metadata.width.is_some() || metadata.height.is_some() {
            record.metadata_source = MetadataSource::Authoritative;
        }
        if let Some(v) = metadata.duration_seconds {
            record.duration_seconds = Some(v);
        }
        if let Some(v) = metadata.width {
            record.width = Some(v);
        }
        if let Some(v) = metadata.height {
            record.height = Some(v);
        }
        if let Some(v) = &metadata.aspect_ratio {
            record.aspect_ratio = Some(v.clone());
        }
        if let Some(v) = metadata.bitrate {
            record.bitrate = Some(v);
        }
        if let Some(v) = &metadata.external_playback_id {
            record.external_playback_id = Some(v.clone());
        }
        if let Some(v) = &metadata.streaming_url {
            record.streaming_url = Some(v.clone());
        }
        if let Some(v) = &metadata.external_status {
            record.external_status = Some(v.clone());
        }
        record.updated_at = now;
        Ok(StatusChange::Applied(record.clone()))
    }

    async fn upgrade_thumbnail(&self, id: Uuid, thumbnail: &ThumbnailRef) -> Result<bool, AppError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(false);
        };
        let better = record
            .thumbnail_tier
            .map_or(true, |current| thumbnail.tier.outranks(current));
        if better {
            record.thumbnail_ref = Some(thumbnail.url.clone());
            record.thumbnail_tier = Some(thumbnail.tier);
            record.updated_at = Utc::now();
        }
        Ok(better)
    }

    async fn apply_patch(&self, id: Uuid, patch: &VideoPatch) -> Result<VideoRecord, AppError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let record = state.records.get_mut(&id).ok_or_else(|| not_found(id))?;
        if let Some(v) = &patch.external_status {
            record.external_status = Some(v.clone());
        }
        if let Some(v) = &patch.download_url {
            record.download_url = Some(v.clone());
        }
        if let Some(v) = &patch.captions_ref {
            record.captions_ref = Some(v.clone());
        }
        if let Some(v) = &patch.transcript_text {
            record.transcript_text = Some(v.clone());
        }
        if let Some(v) = patch.audio_enhanced {
            record.audio_enhanced = Some(v);
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list_needing_thumbnails(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VideoRecord>, AppError> {
        self.check_available()?;
        Ok(self
            .all()
            .into_iter()
            .filter(|r| {
                r.thumbnail_tier.is_none() || r.thumbnail_tier == Some(ThumbnailTier::Placeholder)
            })
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<VideoRecord, AppError> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let record = state.records.get_mut(&id).ok_or_else(|| not_found(id))?;
        if record.status != VideoStatus::Failed {
            return Err(AppError::InvalidStateTransition {
                from: record.status.to_string(),
                to: VideoStatus::Pending.to_string(),
            });
        }
        record.status = VideoStatus::Pending;
        record.external_asset_id = None;
        record.external_playback_id = None;
        record.external_status = None;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.check_available()
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<Vec<ProcessingJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ProcessingJob> {
        lock(&self.jobs).clone()
    }

    pub fn of_type(&self, video_id: Uuid, job_type: JobType) -> Vec<ProcessingJob> {
        lock(&self.jobs)
            .iter()
            .filter(|j| j.video_id == video_id && j.job_type == job_type)
            .cloned()
            .collect()
    }

    /// Shift a job's timestamps into the past.
    pub fn age(&self, id: Uuid, seconds: i64) {
        if let Some(job) = lock(&self.jobs).iter_mut().find(|j| j.id == id) {
            job.updated_at -= Duration::seconds(seconds);
            job.scheduled_at -= Duration::seconds(seconds);
        }
    }

    fn update<F>(&self, id: Uuid, f: F) -> Result<ProcessingJob>
    where
        F: FnOnce(&mut ProcessingJob),
    {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| anyhow!("Processing job {} not found", id))?;
        f(job);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

fn settle(job: &mut ProcessingJob, settlement: &JobSettlement) {
    let now = Utc::now();
    match settlement {
        JobSettlement::Completed => job.status = JobStatus::Completed,
        JobSettlement::Failed(error) => {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.clone());
        }
    }
    job.completed_at = Some(now);
    job.updated_at = now;
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, new: NewJob) -> Result<ProcessingJob> {
        let now = Utc::now();
        let job = ProcessingJob {
            id: Uuid::new_v4(),
            video_id: new.video_id,
            job_type: new.job_type,
            status: new.status,
            external_job_id: None,
            payload: new.payload,
            attempts: 0,
            max_attempts: new.max_attempts,
            last_error: None,
            scheduled_at: now,
            started_at: (new.status == JobStatus::Running).then_some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        lock(&self.jobs).push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(lock(&self.jobs).iter().find(|j| j.id == id).cloned())
    }

    async fn list_for_video(&self, video_id: Uuid) -> Result<Vec<ProcessingJob>> {
        Ok(lock(&self.jobs)
            .iter()
            .filter(|j| j.video_id == video_id)
            .cloned()
            .collect())
    }

    async fn claim_next_job(&self) -> Result<Option<ProcessingJob>> {
        let now = Utc::now();
        let mut jobs = lock(&self.jobs);
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now)
            .min_by_key(|j| j.scheduled_at);
        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.attempts += 1;
            job.started_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn mark_awaiting_callback(
        &self,
        id: Uuid,
        external_job_id: Option<&str>,
    ) -> Result<ProcessingJob> {
        self.update(id, |job| {
            job.status = JobStatus::AwaitingCallback;
            if let Some(ext) = external_job_id {
                job.external_job_id = Some(ext.to_string());
            }
        })
    }

    async fn mark_completed(&self, id: Uuid) -> Result<ProcessingJob> {
        self.update(id, |job| settle(job, &JobSettlement::Completed))
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<ProcessingJob> {
        self.update(id, |job| {
            settle(job, &JobSettlement::Failed(error.to_string()))
        })
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        delay_secs: i64,
    ) -> Result<ProcessingJob> {
        self.update(id, |job| {
            job.status = JobStatus::Pending;
            job.last_error = Some(error.to_string());
            job.started_at = None;
            job.scheduled_at = Utc::now() + Duration::seconds(delay_secs);
        })
    }

    async fn settle_open_jobs(
        &self,
        video_id: Uuid,
        job_type: JobType,
        settlement: JobSettlement,
    ) -> Result<u64> {
        let mut count = 0;
        for job in lock(&self.jobs).iter_mut().filter(|j| {
            j.video_id == video_id && j.job_type == job_type && !j.status.is_terminal()
        }) {
            settle(job, &settlement);
            count += 1;
        }
        Ok(count)
    }

    async fn settle_by_external_job_id(
        &self,
        external_job_id: &str,
        settlement: JobSettlement,
    ) -> Result<Option<ProcessingJob>> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.iter_mut().find(|j| {
            j.external_job_id.as_deref() == Some(external_job_id) && !j.status.is_terminal()
        });
        Ok(job.map(|job| {
            settle(job, &settlement);
            job.clone()
        }))
    }

    async fn reap_stale_jobs(&self, grace_secs: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(grace_secs);
        let mut count = 0;
        for job in lock(&self.jobs).iter_mut().filter(|j| {
            matches!(j.status, JobStatus::Running | JobStatus::AwaitingCallback)
                && j.updated_at < cutoff
        }) {
            settle(
                job,
                &JobSettlement::Failed("Timed out waiting for completion".to_string()),
            );
            count += 1;
        }
        Ok(count)
    }
}

#[derive(Default)]
pub struct InMemoryWebhookLedger {
    events: Mutex<Vec<WebhookEvent>>,
}

impl InMemoryWebhookLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outcomes(&self) -> Vec<Option<WebhookOutcome>> {
        lock(&self.events).iter().map(|e| e.outcome).collect()
    }

    /// Shift every entry's receipt time into the past.
    pub fn age_all(&self, days: i64) {
        for event in lock(&self.events).iter_mut() {
            event.received_at -= Duration::days(days);
        }
    }
}

#[async_trait]
impl WebhookLedger for InMemoryWebhookLedger {
    async fn record_delivery(
        &self,
        event_type: &str,
        external_asset_id: &str,
        payload_hash: &str,
    ) -> Result<LedgerEntry> {
        let mut events = lock(&self.events);
        if let Some(existing) = events
            .iter()
            .find(|e| e.external_asset_id == external_asset_id && e.payload_hash == payload_hash)
        {
            return Ok(LedgerEntry {
                event: existing.clone(),
                first_delivery: false,
            });
        }
        let event = WebhookEvent {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            external_asset_id: external_asset_id.to_string(),
            payload_hash: payload_hash.to_string(),
            outcome: None,
            received_at: Utc::now(),
            applied_at: None,
        };
        events.push(event.clone());
        Ok(LedgerEntry {
            event,
            first_delivery: true,
        })
    }

    async fn mark_outcome(&self, id: Uuid, outcome: WebhookOutcome) -> Result<()> {
        if let Some(event) = lock(&self.events).iter_mut().find(|e| e.id == id) {
            event.outcome = Some(outcome);
            event.applied_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn purge_older_than(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut events = lock(&self.events);
        let before = events.len();
        events.retain(|e| e.received_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}
