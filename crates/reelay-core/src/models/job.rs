use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    AssetCreation,
    AudioEnhancement,
    CaptionGeneration,
    ThumbnailRegeneration,
}

impl Display for JobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobType::AssetCreation => write!(f, "asset_creation"),
            JobType::AudioEnhancement => write!(f, "audio_enhancement"),
            JobType::CaptionGeneration => write!(f, "caption_generation"),
            JobType::ThumbnailRegeneration => write!(f, "thumbnail_regeneration"),
        }
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset_creation" => Ok(JobType::AssetCreation),
            "audio_enhancement" => Ok(JobType::AudioEnhancement),
            "caption_generation" => Ok(JobType::CaptionGeneration),
            "thumbnail_regeneration" => Ok(JobType::ThumbnailRegeneration),
            _ => Err(anyhow::anyhow!("Invalid job type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    /// The provider accepted the work; a callback or poll finishes it.
    AwaitingCallback,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::AwaitingCallback => write!(f, "awaiting_callback"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "awaiting_callback" => Ok(JobStatus::AwaitingCallback),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// One row per background dispatch, so fire-and-forget work stays observable.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub video_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub external_job_id: Option<String>,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for ProcessingJob {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(ProcessingJob {
            id: row.try_get("id")?,
            video_id: row.try_get("video_id")?,
            job_type: row.try_get::<String, _>("job_type")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job_type: {}", e).into())
            })?,
            status: row.try_get::<String, _>("status")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job status: {}", e).into())
            })?,
            external_job_id: row.try_get("external_job_id")?,
            payload: row.try_get("payload")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            last_error: row.try_get("last_error")?,
            scheduled_at: row.try_get("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl ProcessingJob {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: JobPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Trait for type-safe job payloads
pub trait JobPayload: Serialize + for<'de> Deserialize<'de> {
    fn job_type() -> JobType;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetCreationPayload {}

impl JobPayload for AssetCreationPayload {
    fn job_type() -> JobType {
        JobType::AssetCreation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionGenerationPayload {
    pub language: String,
}

impl Default for CaptionGenerationPayload {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
        }
    }
}

impl JobPayload for CaptionGenerationPayload {
    fn job_type() -> JobType {
        JobType::CaptionGeneration
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioEnhancementPayload {}

impl JobPayload for AudioEnhancementPayload {
    fn job_type() -> JobType {
        JobType::AudioEnhancement
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThumbnailRegenerationPayload {
    pub client_thumbnail: Option<String>,
}

impl JobPayload for ThumbnailRegenerationPayload {
    fn job_type() -> JobType {
        JobType::ThumbnailRegeneration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_strings() {
        assert_eq!(JobStatus::AwaitingCallback.to_string(), "awaiting_callback");
        assert_eq!(
            "awaiting_callback".parse::<JobStatus>().unwrap(),
            JobStatus::AwaitingCallback
        );
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::AwaitingCallback.is_terminal());
    }

    #[test]
    fn test_payload_defaults() {
        let payload: CaptionGenerationPayload = serde_json::from_value(serde_json::json!({
            "language": "fr"
        }))
        .unwrap();
        assert_eq!(payload.language, "fr");
        assert_eq!(CaptionGenerationPayload::default().language, "en");
        assert_eq!(
            ThumbnailRegenerationPayload::job_type(),
            JobType::ThumbnailRegeneration
        );
    }
}
