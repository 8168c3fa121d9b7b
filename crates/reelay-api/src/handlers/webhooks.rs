//! Provider callback ingest.

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use reelay_core::AppError;
use reelay_provider::{signature, ProviderEvent, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER};
use std::sync::Arc;

/// Acknowledges a provider callback and applies it in the background.
///
/// Only an unverifiable or unreadable body is refused; everything else is
/// acknowledged so the provider stops redelivering, and the outcome lands
/// in the webhook ledger.
#[utoipa::path(
    post,
    path = "/api/v0/webhooks/provider",
    tag = "webhooks",
    request_body(content = inline(Object), content_type = "application/json"),
    responses(
        (status = 200, description = "Callback received"),
        (status = 400, description = "Body is not a provider event", body = ErrorResponse),
        (status = 401, description = "Signature verification failed", body = ErrorResponse)
    )
)]
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    if let Some(secret) = state.webhook_signing_secret() {
        let header = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());
        let now = chrono::Utc::now().timestamp();
        if let Err(e) = signature::verify(secret, header, &body, now, DEFAULT_TOLERANCE_SECS) {
            tracing::warn!(error = %e, "Rejected provider callback");
            return Err(AppError::Unauthorized(e.to_string()).into());
        }
    }

    let event = ProviderEvent::parse(&body).map_err(|e| AppError::InvalidInput(e.to_string()))?;
    tracing::info!(
        event_type = %event.event_type,
        external_asset_id = %event.external_asset_id,
        "Provider callback received"
    );

    let webhooks = state.webhooks.clone();
    tokio::spawn(async move {
        match webhooks.process(&body).await {
            Ok(disposition) => {
                tracing::debug!(
                    event_type = %event.event_type,
                    external_asset_id = %event.external_asset_id,
                    disposition = ?disposition,
                    "Provider callback processed"
                );
            }
            Err(e) => {
                tracing::error!(
                    event_type = %event.event_type,
                    external_asset_id = %event.external_asset_id,
                    error = %e,
                    "Failed to process provider callback"
                );
            }
        }
    });

    Ok((StatusCode::OK, Json(serde_json::json!({ "received": true }))))
}
