//! Operator endpoints, mounted behind the operator key middleware.

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use reelay_core::models::VideoResponse;
use reelay_processing::ReprocessBatchReport;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReprocessQuery {
    /// Position in the listing of records on a fallback thumbnail.
    #[serde(default)]
    pub offset: i64,
    /// Batch size, capped by the configured maximum.
    pub limit: Option<u32>,
}

#[utoipa::path(
    post,
    path = "/api/v0/admin/thumbnails/reprocess",
    tag = "admin",
    params(ReprocessQuery),
    responses(
        (status = 200, description = "Batch processed", body = ReprocessBatchReport),
        (status = 401, description = "Missing or invalid operator key", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn reprocess_thumbnails(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReprocessQuery>,
) -> Result<Json<ReprocessBatchReport>, HttpAppError> {
    let limit = query
        .limit
        .unwrap_or_else(|| state.config.reprocess_batch_size());
    let report = state.reprocessor.run_batch(query.offset, limit).await?;
    tracing::info!(
        offset = query.offset,
        processed = report.processed,
        upgraded = report.upgraded,
        next_offset = ?report.next_offset,
        "Thumbnail reprocess batch finished"
    );
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/api/v0/admin/videos/{id}/retry",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Video reset and asset creation queued", body = VideoResponse),
        (status = 401, description = "Missing or invalid operator key", body = ErrorResponse),
        (status = 404, description = "Video not found", body = ErrorResponse),
        (status = 409, description = "Video is not in the failed state", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn retry_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<VideoResponse>, HttpAppError> {
    let record = state.intake.retry(id).await?;
    Ok(Json(VideoResponse::from(record)))
}
