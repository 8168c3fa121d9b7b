use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::services::intake::{IntakeRequest, IntakeResponse};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use reelay_core::models::{ProcessingJob, VideoResponse};
use std::sync::Arc;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/api/v0/videos",
    tag = "videos",
    request_body = IntakeRequest,
    responses(
        (status = 201, description = "Video accepted", body = IntakeResponse),
        (status = 200, description = "Video already registered for this provider asset", body = IntakeResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 500, description = "Record store unavailable", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(title = %request.title))]
pub async fn create_video(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<IntakeRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let outcome = state.intake.intake(request).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.response)))
}

#[utoipa::path(
    get,
    path = "/api/v0/videos/{id}",
    tag = "videos",
    params(("id" = Uuid, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Current record", body = VideoResponse),
        (status = 404, description = "Video not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<VideoResponse>, HttpAppError> {
    let record = state.records.get(id).await?;
    Ok(Json(VideoResponse::from(record)))
}

/// Background jobs recorded for a video, oldest first.
#[utoipa::path(
    get,
    path = "/api/v0/videos/{id}/jobs",
    tag = "videos",
    params(("id" = Uuid, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Jobs for the video", body = [ProcessingJob]),
        (status = 404, description = "Video not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn list_video_jobs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ProcessingJob>>, HttpAppError> {
    state.records.get(id).await?;
    let jobs = state.jobs.list_for_video(id).await?;
    Ok(Json(jobs))
}
