use async_trait::async_trait;
use reelay_core::models::{
    AuthoritativeMetadata, NewVideoRecord, ThumbnailRef, VideoPatch, VideoRecord, VideoStatus,
};
use reelay_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

macro_rules! video_columns {
    () => {
        r#"
            id, storage_key, original_filename, size_bytes, mime_type,
            title, description, category, tags, visibility,
            status, processing_mode,
            external_asset_id, external_playback_id, external_status,
            thumbnail_ref, thumbnail_tier, streaming_url, download_url,
            duration_seconds, width, height, aspect_ratio, bitrate, metadata_source,
            transcript_text, captions_ref, audio_enhanced,
            created_at, updated_at, ready_at
        "#
    };
}

/// Result of a guarded status change.
#[derive(Debug, Clone)]
pub enum StatusChange {
    /// The record moved to the requested status.
    Applied(VideoRecord),
    /// The record was already in the requested status.
    Unchanged(VideoRecord),
    /// The edge is not allowed from the record's current status.
    Rejected(VideoRecord),
}

impl StatusChange {
    pub fn record(&self) -> &VideoRecord {
        match self {
            StatusChange::Applied(r) | StatusChange::Unchanged(r) | StatusChange::Rejected(r) => r,
        }
    }

    pub fn into_record(self) -> VideoRecord {
        match self {
            StatusChange::Applied(r) | StatusChange::Unchanged(r) | StatusChange::Rejected(r) => r,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StatusChange::Applied(_))
    }

    /// Classify a conditional update that matched no row, given the current record.
    pub fn from_current(current: VideoRecord, target: VideoStatus) -> Self {
        if current.status == target {
            StatusChange::Unchanged(current)
        } else {
            StatusChange::Rejected(current)
        }
    }
}

/// Storage operations on video records.
///
/// Every mutation is a single conditional statement, so concurrent writers
/// (intake, the synchronous coordinator, webhook processing) cannot clobber a
/// terminal status or downgrade a thumbnail.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Insert a new pending record. A conflicting `external_asset_id` yields
    /// `AppError::DuplicateExternalAsset`.
    async fn insert(&self, new: &NewVideoRecord) -> Result<VideoRecord, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<VideoRecord>, AppError>;

    async fn find_by_external_asset_id(
        &self,
        external_asset_id: &str,
    ) -> Result<Option<VideoRecord>, AppError>;

    /// Record the provider's asset handle. An already attached id is kept.
    async fn attach_external_asset(
        &self,
        id: Uuid,
        external_asset_id: &str,
        external_playback_id: Option<&str>,
    ) -> Result<VideoRecord, AppError>;

    async fn transition(&self, id: Uuid, target: VideoStatus) -> Result<StatusChange, AppError>;

    /// Merge authoritative metadata and move to `ready` in one step.
    async fn mark_ready(
        &self,
        id: Uuid,
        metadata: &AuthoritativeMetadata,
    ) -> Result<StatusChange, AppError>;

    /// Store `thumbnail` only if it outranks the stored one. Returns whether it was written.
    async fn upgrade_thumbnail(&self, id: Uuid, thumbnail: &ThumbnailRef) -> Result<bool, AppError>;

    async fn apply_patch(&self, id: Uuid, patch: &VideoPatch) -> Result<VideoRecord, AppError>;

    /// Records whose thumbnail is missing or still the placeholder, oldest first.
    async fn list_needing_thumbnails(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VideoRecord>, AppError>;

    /// Operator retry: the only edge out of `failed`. The provider handles are
    /// dropped so the next asset creation starts over.
    async fn reset_for_retry(&self, id: Uuid) -> Result<VideoRecord, AppError>;

    /// Round trip to the backing store, used by health checks.
    async fn ping(&self) -> Result<(), AppError>;
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                && db_err
                    .constraint()
                    .map_or(true, |c| c.contains("external_asset_id"))
        }
        _ => false,
    }
}

#[derive(Clone)]
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn require(&self, id: Uuid) -> Result<VideoRecord, AppError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Video {} not found", id)))
    }
}

#[async_trait]
impl VideoStore for PgVideoRepository {
    #[tracing::instrument(
        skip(self, new),
        fields(db.table = "videos", db.operation = "insert", video.id = %new.id)
    )]
    async fn insert(&self, new: &NewVideoRecord) -> Result<VideoRecord, AppError> {
        let result = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            r#"
            INSERT INTO videos (
                id, storage_key, original_filename, size_bytes, mime_type,
                title, description, category, tags, visibility,
                status, processing_mode, external_asset_id,
                thumbnail_ref, thumbnail_tier,
                duration_seconds, width, height, aspect_ratio, bitrate, metadata_source
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                'pending', $11, $12, $13, $14, $15, $16, $17, $18, $19, 'estimated'
            )
            RETURNING "#,
            video_columns!()
        ))
        .bind(new.id)
        .bind(&new.storage_key)
        .bind(&new.original_filename)
        .bind(new.size_bytes)
        .bind(&new.mime_type)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.category)
        .bind(&new.tags)
        .bind(new.visibility.to_string())
        .bind(new.processing_mode.to_string())
        .bind(&new.external_asset_id)
        .bind(&new.thumbnail.url)
        .bind(new.thumbnail.tier.rank())
        .bind(new.estimate.duration_seconds)
        .bind(new.estimate.width)
        .bind(new.estimate.height)
        .bind(&new.estimate.aspect_ratio)
        .bind(new.estimate.bitrate)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => {
                tracing::info!(
                    video_id = %record.id,
                    external_asset_id = ?record.external_asset_id,
                    processing_mode = %record.processing_mode,
                    "Video record created"
                );
                Ok(record)
            }
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateExternalAsset(
                new.external_asset_id.clone().unwrap_or_default(),
            )),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(skip(self), fields(db.table = "videos", db.operation = "select"))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<VideoRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            "SELECT ",
            video_columns!(),
            " FROM videos WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(db.table = "videos", db.operation = "select"))]
    async fn find_by_external_asset_id(
        &self,
        external_asset_id: &str,
    ) -> Result<Option<VideoRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            "SELECT ",
            video_columns!(),
            " FROM videos WHERE external_asset_id = $1"
        ))
        .bind(external_asset_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(db.table = "videos", db.operation = "update"))]
    async fn attach_external_asset(
        &self,
        id: Uuid,
        external_asset_id: &str,
        external_playback_id: Option<&str>,
    ) -> Result<VideoRecord, AppError> {
        let result = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            r#"
            UPDATE videos
            SET external_asset_id = COALESCE(external_asset_id, $2),
                external_playback_id = COALESCE($3, external_playback_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            video_columns!()
        ))
        .bind(id)
        .bind(external_asset_id)
        .bind(external_playback_id)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(AppError::NotFound(format!("Video {} not found", id))),
            Err(e) if is_unique_violation(&e) => {
                Err(AppError::DuplicateExternalAsset(external_asset_id.to_string()))
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(skip(self), fields(db.table = "videos", db.operation = "update"))]
    async fn transition(&self, id: Uuid, target: VideoStatus) -> Result<StatusChange, AppError> {
        let sources: Vec<String> = VideoStatus::allowed_sources(target)
            .iter()
            .map(|s| s.to_string())
            .collect();

        let updated = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            r#"
            UPDATE videos
            SET status = $2,
                ready_at = CASE WHEN $2 = 'ready' THEN COALESCE(ready_at, NOW()) ELSE ready_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING "#,
            video_columns!()
        ))
        .bind(id)
        .bind(target.to_string())
        .bind(&sources)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => {
                tracing::info!(video_id = %id, status = %target, "Video status changed");
                Ok(StatusChange::Applied(record))
            }
            None => {
                let current = self.require(id).await?;
                Ok(StatusChange::from_current(current, target))
            }
        }
    }

    #[tracing::instrument(skip(self, metadata), fields(db.table = "videos", db.operation = "update"))]
    async fn mark_ready(
        &self,
        id: Uuid,
        metadata: &AuthoritativeMetadata,
    ) -> Result<StatusChange, AppError> {
        let updated = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            r#"
            UPDATE videos
            SET status = 'ready',
                ready_at = COALESCE(ready_at, NOW()),
                duration_seconds = COALESCE($2, duration_seconds),
                width = COALESCE($3, width),
                height = COALESCE($4, height),
                aspect_ratio = COALESCE($5, aspect_ratio),
                bitrate = COALESCE($6, bitrate),
                external_playback_id = COALESCE($7, external_playback_id),
                streaming_url = COALESCE($8, streaming_url),
                external_status = COALESCE($9, external_status),
                metadata_source = CASE
                    WHEN $2 IS NOT NULL OR $3 IS NOT NULL OR $4 IS NOT NULL THEN 'authoritative'
                    ELSE metadata_source
                END,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING "#,
            video_columns!()
        ))
        .bind(id)
        .bind(metadata.duration_seconds)
        .bind(metadata.width)
        .bind(metadata.height)
        .bind(&metadata.aspect_ratio)
        .bind(metadata.bitrate)
        .bind(&metadata.external_playback_id)
        .bind(&metadata.streaming_url)
        .bind(&metadata.external_status)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => {
                tracing::info!(
                    video_id = %id,
                    duration_seconds = ?record.duration_seconds,
                    "Video marked ready"
                );
                Ok(StatusChange::Applied(record))
            }
            None => {
                let current = self.require(id).await?;
                Ok(StatusChange::from_current(current, VideoStatus::Ready))
            }
        }
    }

    #[tracing::instrument(skip(self, thumbnail), fields(db.table = "videos", db.operation = "update", tier = %thumbnail.tier))]
    async fn upgrade_thumbnail(&self, id: Uuid, thumbnail: &ThumbnailRef) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET thumbnail_ref = $2,
                thumbnail_tier = $3,
                updated_at = NOW()
            WHERE id = $1 AND (thumbnail_tier IS NULL OR thumbnail_tier > $3)
            "#,
        )
        .bind(id)
        .bind(&thumbnail.url)
        .bind(thumbnail.tier.rank())
        .execute(&self.pool)
        .await?;

        let upgraded = result.rows_affected() > 0;
        if upgraded {
            tracing::debug!(video_id = %id, tier = %thumbnail.tier, "Thumbnail upgraded");
        }
        Ok(upgraded)
    }

    #[tracing::instrument(skip(self, patch), fields(db.table = "videos", db.operation = "update"))]
    async fn apply_patch(&self, id: Uuid, patch: &VideoPatch) -> Result<VideoRecord, AppError> {
        let record = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            r#"
            UPDATE videos
            SET external_status = COALESCE($2, external_status),
                download_url = COALESCE($3, download_url),
                captions_ref = COALESCE($4, captions_ref),
                transcript_text = COALESCE($5, transcript_text),
                audio_enhanced = COALESCE($6, audio_enhanced),
                updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            video_columns!()
        ))
        .bind(id)
        .bind(&patch.external_status)
        .bind(&patch.download_url)
        .bind(&patch.captions_ref)
        .bind(&patch.transcript_text)
        .bind(patch.audio_enhanced)
        .fetch_optional(&self.pool)
        .await?;

        record.ok_or_else(|| AppError::NotFound(format!("Video {} not found", id)))
    }

    #[tracing::instrument(skip(self), fields(db.table = "videos", db.operation = "select"))]
    async fn list_needing_thumbnails(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VideoRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            "SELECT ",
            video_columns!(),
            r#"
            FROM videos
            WHERE thumbnail_tier IS NULL OR thumbnail_tier = 4
            ORDER BY created_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(db.table = "videos", db.operation = "update"))]
    async fn reset_for_retry(&self, id: Uuid) -> Result<VideoRecord, AppError> {
        let updated = sqlx::query_as::<Postgres, VideoRecord>(concat!(
            r#"
            UPDATE videos
            SET status = 'pending',
                external_asset_id = NULL,
                external_playback_id = NULL,
                external_status = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            RETURNING "#,
            video_columns!()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => {
                tracing::info!(video_id = %id, "Video reset for operator retry");
                Ok(record)
            }
            None => {
                let current = self.require(id).await?;
                Err(AppError::InvalidStateTransition {
                    from: current.status.to_string(),
                    to: VideoStatus::Pending.to_string(),
                })
            }
        }
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
