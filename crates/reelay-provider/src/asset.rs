use reelay_core::models::AuthoritativeMetadata;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Preparing,
    Ready,
    Errored,
    #[serde(other)]
    Unknown,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Preparing => "preparing",
            AssetStatus::Ready => "ready",
            AssetStatus::Errored => "errored",
            AssetStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackId {
    pub id: String,
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssetTrack {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub max_width: Option<i32>,
    #[serde(default)]
    pub max_height: Option<i32>,
    #[serde(default)]
    pub text_type: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl AssetTrack {
    pub fn is_video(&self) -> bool {
        self.kind.as_deref() == Some("video")
    }

    pub fn is_audio(&self) -> bool {
        self.kind.as_deref() == Some("audio")
    }

    pub fn is_text(&self) -> bool {
        self.kind.as_deref() == Some("text")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StaticRenditions {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssetErrors {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// The provider's view of an asset at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetSnapshot {
    pub id: String,
    pub status: AssetStatus,
    #[serde(default)]
    pub playback_ids: Vec<PlaybackId>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub max_stored_frame_rate: Option<f64>,
    #[serde(default)]
    pub tracks: Vec<AssetTrack>,
    #[serde(default)]
    pub static_renditions: Option<StaticRenditions>,
    #[serde(default)]
    pub errors: Option<AssetErrors>,
    #[serde(default)]
    pub passthrough: Option<String>,
}

impl AssetSnapshot {
    pub fn is_ready(&self) -> bool {
        self.status == AssetStatus::Ready
    }

    pub fn is_errored(&self) -> bool {
        self.status == AssetStatus::Errored
    }

    pub fn playback_id(&self) -> Option<&str> {
        self.playback_ids.first().map(|p| p.id.as_str())
    }

    pub fn video_track(&self) -> Option<&AssetTrack> {
        self.tracks.iter().find(|t| t.is_video())
    }

    pub fn audio_track(&self) -> Option<&AssetTrack> {
        self.tracks.iter().find(|t| t.is_audio())
    }

    pub fn error_summary(&self) -> String {
        match &self.errors {
            Some(errors) if !errors.messages.is_empty() => errors.messages.join("; "),
            Some(AssetErrors { kind: Some(kind), .. }) => kind.clone(),
            _ => "provider reported an error".to_string(),
        }
    }

    /// Metadata to merge into the record. The bitrate is derived from the
    /// stored file size because the provider does not report one.
    pub fn authoritative_metadata(&self, size_bytes: i64) -> AuthoritativeMetadata {
        let track = self.video_track();
        let bitrate = self
            .duration
            .filter(|d| *d > 0.0 && size_bytes > 0)
            .map(|d| ((size_bytes as f64 * 8.0) / d).round() as i64);

        AuthoritativeMetadata {
            duration_seconds: self.duration,
            width: track.and_then(|t| t.max_width),
            height: track.and_then(|t| t.max_height),
            aspect_ratio: self.aspect_ratio.clone(),
            bitrate,
            external_playback_id: self.playback_id().map(str::to_string),
            streaming_url: None,
            external_status: Some(self.status.as_str().to_string()),
        }
    }
}
