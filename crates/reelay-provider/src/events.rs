//! Provider callback payloads.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::asset::AssetSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AssetCreated,
    AssetReady,
    AssetErrored,
    StaticRenditionsReady,
    TrackReady,
    Other,
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "video.asset.created" | "asset.created" => EventKind::AssetCreated,
            "video.asset.ready" | "asset.ready" => EventKind::AssetReady,
            "video.asset.errored" | "asset.errored" => EventKind::AssetErrored,
            "video.asset.static_renditions.ready" | "asset.static_renditions.ready" => {
                EventKind::StaticRenditionsReady
            }
            "video.asset.track.ready" | "asset.track.ready" => EventKind::TrackReady,
            _ => EventKind::Other,
        }
    }
}

/// A parsed callback. `data` is kept raw since its shape depends on the event type.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub event_type: String,
    pub kind: EventKind,
    pub external_asset_id: String,
    pub data: Value,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("Webhook body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Webhook body has no event type")]
    MissingType,
    #[error("Webhook body does not identify an asset")]
    MissingAssetId,
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

impl ProviderEvent {
    pub fn parse(body: &[u8]) -> Result<Self, EventParseError> {
        let raw: Value =
            serde_json::from_slice(body).map_err(|e| EventParseError::InvalidJson(e.to_string()))?;

        let event_type = str_at(&raw, "/type")
            .or_else(|| str_at(&raw, "/eventType"))
            .or_else(|| str_at(&raw, "/event_type"))
            .ok_or(EventParseError::MissingType)?
            .to_string();

        let object_is_asset = str_at(&raw, "/object/type") == Some("asset");
        let external_asset_id = str_at(&raw, "/externalAssetId")
            .or_else(|| str_at(&raw, "/external_asset_id"))
            .or_else(|| str_at(&raw, "/data/asset_id"))
            .or_else(|| object_is_asset.then(|| str_at(&raw, "/object/id")).flatten())
            .or_else(|| str_at(&raw, "/data/id"))
            .ok_or(EventParseError::MissingAssetId)?
            .to_string();

        let data = raw.get("data").cloned().unwrap_or(Value::Null);

        Ok(Self {
            kind: EventKind::from_type(&event_type),
            event_type,
            external_asset_id,
            data,
        })
    }

    /// The asset embedded in asset-level events.
    pub fn asset(&self) -> Option<AssetSnapshot> {
        serde_json::from_value(self.data.clone()).ok()
    }

    pub fn track_id(&self) -> Option<&str> {
        str_at(&self.data, "/id")
    }

    pub fn track_kind(&self) -> Option<&str> {
        str_at(&self.data, "/type")
    }

    pub fn passthrough(&self) -> Option<&str> {
        str_at(&self.data, "/passthrough")
    }
}

/// Lowercase hex SHA-256 of a raw request body.
pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}
