//! OpenAPI documentation.
//! Handler annotations use the literal `/api/v0` prefix; `API_VERSION` must match it.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use crate::services::intake;
use reelay_core::models;

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Reelay API",
        version = "0.1.0",
        description = "Video ingestion: intake of uploaded videos, provider processing and callback reconciliation."
    ),
    paths(
        handlers::videos::create_video,
        handlers::videos::get_video,
        handlers::videos::list_video_jobs,
        handlers::webhooks::provider_webhook,
        handlers::admin::reprocess_thumbnails,
        handlers::admin::retry_video,
        handlers::health::health_check,
    ),
    components(schemas(
        intake::IntakeRequest,
        intake::IntakeResponse,
        models::VideoResponse,
        models::VideoStatus,
        models::ProcessingMode,
        models::MetadataSource,
        models::Visibility,
        models::ThumbnailTier,
        models::ProcessingJob,
        models::JobType,
        models::JobStatus,
        reelay_processing::ReprocessBatchReport,
        handlers::health::HealthCheckResponse,
        error::ErrorResponse,
    )),
    tags(
        (name = "videos", description = "Video intake and status"),
        (name = "webhooks", description = "Provider callbacks"),
        (name = "admin", description = "Operator maintenance"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;
