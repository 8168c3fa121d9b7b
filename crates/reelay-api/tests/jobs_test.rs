//! Background job handler tests, driven through the queue the way the
//! worker pool runs them.
//!
//! Run with: `cargo test -p reelay-api --test jobs_test`

mod helpers;

use helpers::{api_path, large_upload, setup_test_app, setup_test_app_with, test_config, TestApp};
use reelay_api::IntakeResponse;
use reelay_core::models::{
    CaptionGenerationPayload, JobStatus, JobType, ThumbnailTier, VideoStatus,
};
use reelay_provider::fake::ready_asset;
use reelay_provider::ProviderError;
use serde_json::{json, Value};
use uuid::Uuid;

fn rejected() -> ProviderError {
    ProviderError::Rejected {
        status: 400,
        message: "input file is not a video".to_string(),
    }
}

fn transient() -> ProviderError {
    ProviderError::Transient("HTTP 503: upstream unavailable".to_string())
}

async fn intake(app: &TestApp, body: &Value) -> Uuid {
    let response: IntakeResponse = app
        .client()
        .post(&api_path("/videos"))
        .json(body)
        .await
        .json();
    response.id
}

#[tokio::test]
async fn test_rejected_asset_without_fallback_thumbnail_fails_video() {
    let mut config = test_config();
    config.thumbnail_synthesized_enabled = false;
    let app = setup_test_app_with(config).await;
    app.provider.script_creates(vec![Err(rejected())]);
    let id = intake(&app, &large_upload()).await;

    app.run_pending_jobs().await;

    let record = app.record(id);
    assert_eq!(record.status, VideoStatus::Failed);
    assert_eq!(record.external_status.as_deref(), Some("errored"));
    let creation = &app.jobs.of_type(id, JobType::AssetCreation)[0];
    assert_eq!(creation.status, JobStatus::Failed);
    assert_eq!(creation.attempts, 1);
}

#[tokio::test]
async fn test_rejected_asset_with_fallback_thumbnail_degrades_video() {
    let app = setup_test_app().await;
    app.provider.script_creates(vec![Err(rejected())]);
    let id = intake(&app, &large_upload()).await;

    app.run_pending_jobs().await;

    let record = app.record(id);
    assert_eq!(record.status, VideoStatus::Processing);
    assert!(record.is_degraded());
    assert_eq!(record.thumbnail_tier, Some(ThumbnailTier::Synthesized));
    let creation = &app.jobs.of_type(id, JobType::AssetCreation)[0];
    assert_eq!(creation.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_transient_errors_exhaust_retries_then_degrade() {
    let app = setup_test_app().await;
    app.provider
        .script_creates(vec![Err(transient()), Err(transient()), Err(transient())]);
    let id = intake(&app, &large_upload()).await;

    let ran = app.run_pending_jobs().await;

    assert_eq!(ran.len(), 3);
    assert_eq!(app.provider.create_calls(), 3);
    let creation = &app.jobs.of_type(id, JobType::AssetCreation)[0];
    assert_eq!(creation.status, JobStatus::Failed);
    assert_eq!(creation.attempts, 3);
    assert!(creation
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("temporarily unavailable")));

    let record = app.record(id);
    assert!(record.is_degraded());
    assert!(record.external_asset_id.is_none());
}

#[tokio::test]
async fn test_transient_error_then_success_parks_job_for_callback() {
    let app = setup_test_app().await;
    app.provider.script_creates(vec![Err(transient())]);
    let id = intake(&app, &large_upload()).await;

    app.run_pending_jobs().await;

    let creation = &app.jobs.of_type(id, JobType::AssetCreation)[0];
    assert_eq!(creation.status, JobStatus::AwaitingCallback);
    assert_eq!(creation.attempts, 2);
    assert_eq!(app.record(id).external_asset_id.as_deref(), Some("asset-1"));
}

#[tokio::test]
async fn test_unsupported_audio_enhancement_completes_without_flag() {
    let mut config = test_config();
    config.captions_enabled = false;
    config.audio_enhancement_enabled = true;
    let app = setup_test_app_with(config).await;
    app.provider
        .script_creates(vec![Ok(ready_asset("asset-audio", "pb-audio"))]);
    let id = intake(&app, &large_upload()).await;

    app.run_pending_jobs().await;

    let record = app.record(id);
    assert_eq!(record.status, VideoStatus::Ready);
    assert!(record.audio_enhanced.is_none());
    assert!(app.jobs.of_type(id, JobType::CaptionGeneration).is_empty());
    let audio = app.jobs.of_type(id, JobType::AudioEnhancement);
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn test_thumbnail_regeneration_upgrades_to_provider_frame() {
    let mut config = test_config();
    config.thumbnail_synthesized_enabled = false;
    let app = setup_test_app_with(config).await;
    let mut body = large_upload();
    body["external_asset_id"] = json!("direct-5");
    let id = intake(&app, &body).await;
    assert_eq!(app.record(id).thumbnail_tier, Some(ThumbnailTier::Placeholder));
    assert_eq!(
        app.jobs.of_type(id, JobType::ThumbnailRegeneration).len(),
        1
    );

    app.provider.set_asset(ready_asset("direct-5", "pb-5"));
    app.run_pending_jobs().await;

    let record = app.record(id);
    assert_eq!(record.status, VideoStatus::Ready);
    assert_eq!(record.thumbnail_tier, Some(ThumbnailTier::ProviderFrame));
    assert_eq!(
        record.thumbnail_ref.as_deref(),
        Some("https://image.test/pb-5/thumbnail.jpg")
    );
    let regen = &app.jobs.of_type(id, JobType::ThumbnailRegeneration)[0];
    assert_eq!(regen.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_caption_job_for_video_without_asset_fails() {
    let app = setup_test_app().await;
    app.provider.script_creates(vec![Err(rejected())]);
    let id = intake(&app, &large_upload()).await;
    app.state
        .job_queue
        .submit(
            id,
            JobType::CaptionGeneration,
            json!(CaptionGenerationPayload::default()),
        )
        .await
        .expect("submit caption job");

    app.run_pending_jobs().await;

    let captions = &app.jobs.of_type(id, JobType::CaptionGeneration)[0];
    assert_eq!(captions.status, JobStatus::Failed);
    assert_eq!(captions.attempts, 1);
    assert!(app.provider.caption_requests().is_empty());
}
