use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a video record.
///
/// Valid edges are `pending -> processing` and `pending|processing -> ready|failed`.
/// `ready` and `failed` are terminal; the only way out of `failed` is an explicit
/// operator retry, which the store exposes separately from event processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl VideoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Ready | VideoStatus::Failed)
    }

    /// Whether `self -> next` is an allowed edge. Self-transitions are not edges.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        matches!(
            (*self, next),
            (Pending, Processing) | (Pending, Ready) | (Pending, Failed) | (Processing, Ready)
                | (Processing, Failed)
        )
    }

    /// Statuses from which `target` may be entered.
    pub fn allowed_sources(target: VideoStatus) -> &'static [VideoStatus] {
        match target {
            VideoStatus::Pending => &[],
            VideoStatus::Processing => &[VideoStatus::Pending],
            VideoStatus::Ready | VideoStatus::Failed => {
                &[VideoStatus::Pending, VideoStatus::Processing]
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
        }
    }
}

impl Display for VideoStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VideoStatus::Pending),
            "processing" => Ok(VideoStatus::Processing),
            "ready" => Ok(VideoStatus::Ready),
            "failed" => Ok(VideoStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid video status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Synchronous,
    Asynchronous,
}

impl Display for ProcessingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProcessingMode::Synchronous => write!(f, "synchronous"),
            ProcessingMode::Asynchronous => write!(f, "asynchronous"),
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synchronous" => Ok(ProcessingMode::Synchronous),
            "asynchronous" => Ok(ProcessingMode::Asynchronous),
            _ => Err(anyhow::anyhow!("Invalid processing mode: {}", s)),
        }
    }
}

/// Provenance of duration/dimension/bitrate fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    Estimated,
    Authoritative,
}

impl Display for MetadataSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MetadataSource::Estimated => write!(f, "estimated"),
            MetadataSource::Authoritative => write!(f, "authoritative"),
        }
    }
}

impl FromStr for MetadataSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "estimated" => Ok(MetadataSource::Estimated),
            "authoritative" => Ok(MetadataSource::Authoritative),
            _ => Err(anyhow::anyhow!("Invalid metadata source: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    #[default]
    Private,
}

impl Display for Visibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Unlisted => write!(f, "unlisted"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "unlisted" => Ok(Visibility::Unlisted),
            "private" => Ok(Visibility::Private),
            _ => Err(anyhow::anyhow!("Invalid visibility: {}", s)),
        }
    }
}

/// Thumbnail quality tiers, best first. The rank is persisted; a lower rank wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailTier {
    /// Frame decoded by the processing provider.
    ProviderFrame,
    /// Graphic generated locally from the video's identity.
    Synthesized,
    /// Frame captured by the uploading client.
    ClientCapture,
    /// Generic placeholder image.
    Placeholder,
}

impl ThumbnailTier {
    pub const ALL: [ThumbnailTier; 4] = [
        ThumbnailTier::ProviderFrame,
        ThumbnailTier::Synthesized,
        ThumbnailTier::ClientCapture,
        ThumbnailTier::Placeholder,
    ];

    pub fn rank(&self) -> i16 {
        match self {
            ThumbnailTier::ProviderFrame => 1,
            ThumbnailTier::Synthesized => 2,
            ThumbnailTier::ClientCapture => 3,
            ThumbnailTier::Placeholder => 4,
        }
    }

    pub fn from_rank(rank: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.rank() == rank)
    }

    /// Whether `self` is strictly better than `other`.
    pub fn outranks(&self, other: ThumbnailTier) -> bool {
        self.rank() < other.rank()
    }

    /// Anything but the placeholder counts as something worth showing.
    pub fn is_usable(&self) -> bool {
        !matches!(self, ThumbnailTier::Placeholder)
    }
}

impl Display for ThumbnailTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ThumbnailTier::ProviderFrame => write!(f, "provider_frame"),
            ThumbnailTier::Synthesized => write!(f, "synthesized"),
            ThumbnailTier::ClientCapture => write!(f, "client_capture"),
            ThumbnailTier::Placeholder => write!(f, "placeholder"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ThumbnailRef {
    pub url: String,
    pub tier: ThumbnailTier,
}

impl ThumbnailRef {
    pub fn new(url: impl Into<String>, tier: ThumbnailTier) -> Self {
        Self {
            url: url.into(),
            tier,
        }
    }
}

/// Best-effort metadata derived from size and MIME type only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedMetadata {
    pub duration_seconds: f64,
    pub width: i32,
    pub height: i32,
    pub aspect_ratio: String,
    pub bitrate: i64,
}

/// Values reported by the processing provider once an asset is ready.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthoritativeMetadata {
    pub duration_seconds: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub aspect_ratio: Option<String>,
    pub bitrate: Option<i64>,
    pub external_playback_id: Option<String>,
    pub streaming_url: Option<String>,
    pub external_status: Option<String>,
}

/// Canonical video record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: Uuid,
    pub storage_key: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub status: VideoStatus,
    pub processing_mode: ProcessingMode,
    pub external_asset_id: Option<String>,
    pub external_playback_id: Option<String>,
    pub external_status: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub thumbnail_tier: Option<ThumbnailTier>,
    pub streaming_url: Option<String>,
    pub download_url: Option<String>,
    pub duration_seconds: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub aspect_ratio: Option<String>,
    pub bitrate: Option<i64>,
    pub metadata_source: MetadataSource,
    pub transcript_text: Option<String>,
    pub captions_ref: Option<String>,
    pub audio_enhanced: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for VideoRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        fn decode<T: FromStr<Err = anyhow::Error>>(
            row: &sqlx::postgres::PgRow,
            column: &str,
        ) -> Result<T, sqlx::Error> {
            row.try_get::<String, _>(column)?
                .parse()
                .map_err(|e: anyhow::Error| {
                    sqlx::Error::Decode(format!("Failed to parse {}: {}", column, e).into())
                })
        }

        let thumbnail_tier = match row.try_get::<Option<i16>, _>("thumbnail_tier")? {
            Some(rank) => Some(ThumbnailTier::from_rank(rank).ok_or_else(|| {
                sqlx::Error::Decode(format!("Invalid thumbnail tier rank: {}", rank).into())
            })?),
            None => None,
        };

        Ok(VideoRecord {
            id: row.try_get("id")?,
            storage_key: row.try_get("storage_key")?,
            original_filename: row.try_get("original_filename")?,
            size_bytes: row.try_get("size_bytes")?,
            mime_type: row.try_get("mime_type")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            tags: row.try_get("tags")?,
            visibility: decode(row, "visibility")?,
            status: decode(row, "status")?,
            processing_mode: decode(row, "processing_mode")?,
            external_asset_id: row.try_get("external_asset_id")?,
            external_playback_id: row.try_get("external_playback_id")?,
            external_status: row.try_get("external_status")?,
            thumbnail_ref: row.try_get("thumbnail_ref")?,
            thumbnail_tier,
            streaming_url: row.try_get("streaming_url")?,
            download_url: row.try_get("download_url")?,
            duration_seconds: row.try_get("duration_seconds")?,
            width: row.try_get("width")?,
            height: row.try_get("height")?,
            aspect_ratio: row.try_get("aspect_ratio")?,
            bitrate: row.try_get("bitrate")?,
            metadata_source: decode(row, "metadata_source")?,
            transcript_text: row.try_get("transcript_text")?,
            captions_ref: row.try_get("captions_ref")?,
            audio_enhanced: row.try_get("audio_enhanced")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            ready_at: row.try_get("ready_at")?,
        })
    }
}

impl VideoRecord {
    /// The provider reported a terminal error but the record was kept alive.
    pub fn is_degraded(&self) -> bool {
        !self.status.is_terminal() && self.external_status.as_deref() == Some("errored")
    }

    pub fn has_usable_thumbnail(&self) -> bool {
        self.thumbnail_ref.is_some() && self.thumbnail_tier.is_some_and(|t| t.is_usable())
    }

    /// Stored thumbnail reference, if any.
    pub fn thumbnail(&self) -> Option<ThumbnailRef> {
        match (&self.thumbnail_ref, self.thumbnail_tier) {
            (Some(url), Some(tier)) => Some(ThumbnailRef::new(url.clone(), tier)),
            _ => None,
        }
    }
}

/// Everything needed to insert a new record. The id is always minted locally.
#[derive(Debug, Clone)]
pub struct NewVideoRecord {
    pub id: Uuid,
    pub storage_key: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub processing_mode: ProcessingMode,
    pub external_asset_id: Option<String>,
    pub estimate: EstimatedMetadata,
    pub thumbnail: ThumbnailRef,
}

/// Optional fields filled in by background jobs and secondary callbacks.
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoPatch {
    pub external_status: Option<String>,
    pub download_url: Option<String>,
    pub captions_ref: Option<String>,
    pub transcript_text: Option<String>,
    pub audio_enhanced: Option<bool>,
}

impl VideoPatch {
    pub fn is_empty(&self) -> bool {
        *self == VideoPatch::default()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VideoResponse {
    pub id: Uuid,
    pub status: VideoStatus,
    pub degraded: bool,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub original_filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub processing_mode: ProcessingMode,
    pub external_asset_id: Option<String>,
    pub external_playback_id: Option<String>,
    pub external_status: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub thumbnail_tier: Option<ThumbnailTier>,
    pub streaming_url: Option<String>,
    pub download_url: Option<String>,
    pub duration_seconds: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub aspect_ratio: Option<String>,
    pub bitrate: Option<i64>,
    pub metadata_source: MetadataSource,
    pub transcript_text: Option<String>,
    pub captions_ref: Option<String>,
    pub audio_enhanced: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
}

impl From<VideoRecord> for VideoResponse {
    fn from(video: VideoRecord) -> Self {
        let degraded = video.is_degraded();
        VideoResponse {
            id: video.id,
            status: video.status,
            degraded,
            title: video.title,
            description: video.description,
            category: video.category,
            tags: video.tags,
            visibility: video.visibility,
            original_filename: video.original_filename,
            size_bytes: video.size_bytes,
            mime_type: video.mime_type,
            processing_mode: video.processing_mode,
            external_asset_id: video.external_asset_id,
            external_playback_id: video.external_playback_id,
            external_status: video.external_status,
            thumbnail_ref: video.thumbnail_ref,
            thumbnail_tier: video.thumbnail_tier,
            streaming_url: video.streaming_url,
            download_url: video.download_url,
            duration_seconds: video.duration_seconds,
            width: video.width,
            height: video.height,
            aspect_ratio: video.aspect_ratio,
            bitrate: video.bitrate,
            metadata_source: video.metadata_source,
            transcript_text: video.transcript_text,
            captions_ref: video.captions_ref,
            audio_enhanced: video.audio_enhanced,
            created_at: video.created_at,
            ready_at: video.ready_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_edges() {
        use VideoStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Ready));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Ready.can_transition_to(Processing));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Ready.can_transition_to(Ready));
    }

    #[test]
    fn test_allowed_sources_agree_with_edges() {
        for target in [
            VideoStatus::Pending,
            VideoStatus::Processing,
            VideoStatus::Ready,
            VideoStatus::Failed,
        ] {
            for source in VideoStatus::allowed_sources(target) {
                assert!(source.can_transition_to(target), "{source} -> {target}");
            }
        }
    }

    #[test]
    fn test_tier_ranking() {
        assert!(ThumbnailTier::ProviderFrame.outranks(ThumbnailTier::Placeholder));
        assert!(!ThumbnailTier::Placeholder.outranks(ThumbnailTier::ClientCapture));
        assert!(!ThumbnailTier::Synthesized.outranks(ThumbnailTier::Synthesized));
        for tier in ThumbnailTier::ALL {
            assert_eq!(ThumbnailTier::from_rank(tier.rank()), Some(tier));
        }
        assert_eq!(ThumbnailTier::from_rank(9), None);
        assert!(!ThumbnailTier::Placeholder.is_usable());
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        assert_eq!("ready".parse::<VideoStatus>().unwrap(), VideoStatus::Ready);
        assert!("done".parse::<VideoStatus>().is_err());
        assert_eq!(
            serde_json::to_value(ThumbnailTier::ClientCapture).unwrap(),
            serde_json::json!("client_capture")
        );
    }
}
