//! Request bodies and provider callbacks.

use reelay_provider::signature;
use reelay_provider::AssetSnapshot;
use serde_json::{json, Value};

pub const MB: i64 = 1024 * 1024;

/// Intake body for an already uploaded file.
pub fn intake_body(size_bytes: i64, mime_type: &str) -> Value {
    json!({
        "storage_key": "uploads/2026/clip.mp4",
        "filename": "clip.mp4",
        "size_bytes": size_bytes,
        "mime_type": mime_type,
        "title": "Launch recap",
        "description": "Highlights from the launch",
        "category": "events",
        "tags": ["launch", "recap"],
        "visibility": "public"
    })
}

/// Small enough for synchronous processing.
pub fn small_upload() -> Value {
    intake_body(40 * MB, "video/mp4")
}

/// Routed to background processing.
pub fn large_upload() -> Value {
    intake_body(600 * MB, "video/mp4")
}

/// An asset-level callback in the provider's envelope.
pub fn asset_event(event_type: &str, asset: &AssetSnapshot) -> Value {
    json!({
        "type": event_type,
        "object": { "type": "asset", "id": asset.id },
        "id": format!("evt-{}-{}", event_type, asset.id),
        "data": asset,
    })
}

/// A text track callback for `asset_id`.
pub fn track_ready_event(asset_id: &str, track_id: &str) -> Value {
    json!({
        "type": "video.asset.track.ready",
        "object": { "type": "track", "id": track_id },
        "data": {
            "id": track_id,
            "type": "text",
            "asset_id": asset_id,
            "status": "ready"
        }
    })
}

/// Value for the signature header over `body`, stamped now.
pub fn signature_header(secret: &str, body: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let signature = signature::sign(secret, timestamp, body).expect("sign body");
    format!("t={},v1={}", timestamp, signature)
}
