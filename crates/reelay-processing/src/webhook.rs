//! Provider callback handling.
//!
//! Deliveries are at-least-once and unordered. Correctness rests on the
//! delivery ledger and on the record store refusing to leave terminal states.

use std::sync::Arc;
use std::time::Duration;

use reelay_core::models::{JobType, VideoPatch, VideoRecord, VideoStatus, WebhookOutcome};
use reelay_core::{AppError, Config};
use reelay_db::{JobSettlement, JobStore, RecordStore, WebhookLedger};
use reelay_provider::{payload_hash, EventKind, ProviderEvent};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::reconcile::Reconciler;

#[derive(Debug, Clone)]
pub struct EventProcessorConfig {
    pub lookup_retries: u32,
    pub lookup_backoff: Duration,
}

impl EventProcessorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lookup_retries: config.webhook_lookup_retries(),
            lookup_backoff: Duration::from_millis(config.webhook_lookup_backoff_ms()),
        }
    }
}

/// What happened to a delivery. Every variant is acknowledged to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    Applied,
    Duplicate,
    Ignored,
    Orphaned,
}

impl From<EventDisposition> for Option<WebhookOutcome> {
    fn from(disposition: EventDisposition) -> Self {
        match disposition {
            EventDisposition::Applied => Some(WebhookOutcome::Applied),
            EventDisposition::Ignored => Some(WebhookOutcome::Ignored),
            EventDisposition::Orphaned => Some(WebhookOutcome::Orphaned),
            EventDisposition::Duplicate => None,
        }
    }
}

pub struct WebhookEventProcessor {
    reconciler: Reconciler,
    jobs: Arc<dyn JobStore>,
    ledger: Arc<dyn WebhookLedger>,
    config: EventProcessorConfig,
}

impl WebhookEventProcessor {
    pub fn new(
        reconciler: Reconciler,
        jobs: Arc<dyn JobStore>,
        ledger: Arc<dyn WebhookLedger>,
        config: EventProcessorConfig,
    ) -> Self {
        Self {
            reconciler,
            jobs,
            ledger,
            config,
        }
    }

    fn records(&self) -> &RecordStore {
        self.reconciler.records()
    }

    /// Apply one raw callback body.
    ///
    /// Errors leave the ledger row unsettled so that a redelivery is processed again.
    #[tracing::instrument(skip(self, body), fields(body_len = body.len()))]
    pub async fn process(&self, body: &[u8]) -> Result<EventDisposition, AppError> {
        let event = ProviderEvent::parse(body).map_err(|e| AppError::InvalidInput(e.to_string()))?;
        let hash = payload_hash(body);

        let entry = self
            .ledger
            .record_delivery(&event.event_type, &event.external_asset_id, &hash)
            .await?;
        if entry.should_skip() {
            tracing::debug!(
                event_type = %event.event_type,
                external_asset_id = %event.external_asset_id,
                "Duplicate webhook delivery skipped"
            );
            return Ok(EventDisposition::Duplicate);
        }

        let disposition = self.dispatch(&event).await?;
        if let Some(outcome) = Option::<WebhookOutcome>::from(disposition) {
            self.ledger.mark_outcome(entry.event.id, outcome).await?;
        }

        tracing::info!(
            event_type = %event.event_type,
            external_asset_id = %event.external_asset_id,
            disposition = ?disposition,
            "Webhook processed"
        );
        Ok(disposition)
    }

    async fn dispatch(&self, event: &ProviderEvent) -> Result<EventDisposition, AppError> {
        if event.kind == EventKind::Other {
            return Ok(EventDisposition::Ignored);
        }

        let Some(record) = self.locate_record(event).await? else {
            tracing::error!(
                event_type = %event.event_type,
                external_asset_id = %event.external_asset_id,
                retries = self.config.lookup_retries,
                "Orphaned webhook: no record for asset"
            );
            return Ok(EventDisposition::Orphaned);
        };

        match event.kind {
            EventKind::AssetCreated => self.on_created(&record, event).await,
            EventKind::AssetReady => self.on_ready(&record, event).await,
            EventKind::AssetErrored => self.on_errored(&record, event).await,
            EventKind::StaticRenditionsReady => self.on_renditions_ready(&record).await,
            EventKind::TrackReady => self.on_track_ready(&record, event).await,
            EventKind::Other => Ok(EventDisposition::Ignored),
        }
    }

    /// Find the record for the event's asset, tolerating a lagging read path.
    ///
    /// Never creates a record. The passthrough id lets a callback that races
    /// intake's attach step claim the record intake already created.
    async fn locate_record(&self, event: &ProviderEvent) -> Result<Option<VideoRecord>, AppError> {
        let asset_id = event.external_asset_id.as_str();
        let mut attempt: u32 = 0;
        loop {
            if let Some(record) = self.records().find_by_external_asset_id(asset_id).await? {
                return Ok(Some(record));
            }
            if let Some(record) = self.claim_by_passthrough(event).await? {
                return Ok(Some(record));
            }
            if attempt >= self.config.lookup_retries {
                return Ok(None);
            }

            let backoff = self.config.lookup_backoff.saturating_mul(1 << attempt.min(6));
            attempt += 1;
            tracing::debug!(
                external_asset_id = %asset_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Record not visible yet, retrying lookup"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn claim_by_passthrough(
        &self,
        event: &ProviderEvent,
    ) -> Result<Option<VideoRecord>, AppError> {
        let Some(video_id) = event.passthrough().and_then(|p| Uuid::parse_str(p).ok()) else {
            return Ok(None);
        };
        let Some(record) = self.records().find_by_id(video_id).await? else {
            return Ok(None);
        };

        match record.external_asset_id.as_deref() {
            Some(existing) if existing == event.external_asset_id => Ok(Some(record)),
            Some(existing) => {
                // Left behind when a timed-out creation was handed off and created again.
                tracing::error!(
                    video_id = %record.id,
                    attached_asset_id = %existing,
                    abandoned_asset_id = %event.external_asset_id,
                    "Abandoned provider asset, delete it at the provider"
                );
                Ok(None)
            }
            None => match self
                .records()
                .attach_external_asset(record.id, &event.external_asset_id, None)
                .await
            {
                Ok(record) => Ok(Some(record)),
                Err(AppError::DuplicateExternalAsset(_)) => Ok(None),
                Err(e) => Err(e),
            },
        }
    }

    async fn on_created(
        &self,
        record: &VideoRecord,
        event: &ProviderEvent,
    ) -> Result<EventDisposition, AppError> {
        if record.status.is_terminal() {
            return Ok(EventDisposition::Ignored);
        }
        if let Some(asset) = event.asset() {
            if let Some(playback_id) = asset.playback_id() {
                self.records()
                    .attach_external_asset(record.id, &event.external_asset_id, Some(playback_id))
                    .await?;
            }
            self.records()
                .apply_patch(
                    record.id,
                    &VideoPatch {
                        external_status: Some(asset.status.as_str().to_string()),
                        ..Default::default()
                    },
                )
                .await?;
        }
        let change = self
            .records()
            .transition(record.id, VideoStatus::Processing)
            .await?;
        Ok(if change.is_applied() {
            EventDisposition::Applied
        } else {
            EventDisposition::Ignored
        })
    }

    async fn on_ready(
        &self,
        record: &VideoRecord,
        event: &ProviderEvent,
    ) -> Result<EventDisposition, AppError> {
        if record.status.is_terminal() {
            return Ok(EventDisposition::Ignored);
        }

        let snapshot = match event.asset().filter(|a| a.is_ready()) {
            Some(snapshot) => snapshot,
            None => self
                .reconciler
                .provider()
                .get_asset(&event.external_asset_id)
                .await?,
        };

        let (_, applied) = self.reconciler.apply_ready(record, &snapshot).await?;
        self.jobs
            .settle_open_jobs(record.id, JobType::AssetCreation, JobSettlement::Completed)
            .await?;

        Ok(if applied {
            EventDisposition::Applied
        } else {
            EventDisposition::Ignored
        })
    }

    async fn on_errored(
        &self,
        record: &VideoRecord,
        event: &ProviderEvent,
    ) -> Result<EventDisposition, AppError> {
        if record.status.is_terminal() {
            return Ok(EventDisposition::Ignored);
        }

        let reason = event
            .asset()
            .map(|a| a.error_summary())
            .unwrap_or_else(|| "provider reported an error".to_string());
        self.reconciler.apply_errored(record, &reason).await?;
        self.jobs
            .settle_open_jobs(
                record.id,
                JobType::AssetCreation,
                JobSettlement::Failed(reason),
            )
            .await?;
        Ok(EventDisposition::Applied)
    }

    async fn on_renditions_ready(&self, record: &VideoRecord) -> Result<EventDisposition, AppError> {
        let Some(playback_id) = record.external_playback_id.as_deref() else {
            return Ok(EventDisposition::Ignored);
        };
        let patch = VideoPatch {
            download_url: Some(self.reconciler.provider().download_url(playback_id)),
            ..Default::default()
        };
        self.records().apply_patch(record.id, &patch).await?;
        Ok(EventDisposition::Applied)
    }

    async fn on_track_ready(
        &self,
        record: &VideoRecord,
        event: &ProviderEvent,
    ) -> Result<EventDisposition, AppError> {
        if event.track_kind() != Some("text") {
            return Ok(EventDisposition::Ignored);
        }
        let (Some(track_id), Some(playback_id)) =
            (event.track_id(), record.external_playback_id.as_deref())
        else {
            tracing::warn!(
                video_id = %record.id,
                "Text track ready but record has no playback id"
            );
            return Ok(EventDisposition::Ignored);
        };

        let provider = self.reconciler.provider();
        let captions_url = provider.text_track_url(playback_id, track_id);
        let transcript = match provider.fetch_text(&captions_url).await {
            Ok(vtt) => Some(vtt_to_text(&vtt)).filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!(
                    video_id = %record.id,
                    error = %e,
                    "Failed to fetch caption track, storing reference only"
                );
                None
            }
        };

        let patch = VideoPatch {
            captions_ref: Some(captions_url),
            transcript_text: transcript,
            ..Default::default()
        };
        self.records().apply_patch(record.id, &patch).await?;

        let settled = self
            .jobs
            .settle_by_external_job_id(track_id, JobSettlement::Completed)
            .await?;
        if settled.is_none() {
            self.jobs
                .settle_open_jobs(
                    record.id,
                    JobType::CaptionGeneration,
                    JobSettlement::Completed,
                )
                .await?;
        }
        Ok(EventDisposition::Applied)
    }
}

/// Cue text of a WebVTT document joined into plain prose.
pub fn vtt_to_text(vtt: &str) -> String {
    let mut lines = Vec::new();
    let mut in_note = false;
    for line in vtt.lines() {
        let line = line.trim();
        if line.is_empty() {
            in_note = false;
            continue;
        }
        if in_note || line.starts_with("WEBVTT") || line.contains("-->") {
            continue;
        }
        if line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION") {
            in_note = true;
            continue;
        }
        if line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        lines.push(strip_tags(line));
    }
    lines.join(" ")
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnail::{ThumbnailChain, ThumbnailChainConfig};
    use reelay_core::models::{JobStatus, ThumbnailTier};
    use reelay_db::memory::{
        sample_new_video, InMemoryJobStore, InMemoryVideoStore, InMemoryWebhookLedger,
    };
    use reelay_db::NewJob;
    use reelay_provider::fake::{errored_asset, preparing_asset, ready_asset, FakeProvider};
    use serde_json::json;

    struct Harness {
        videos: Arc<InMemoryVideoStore>,
        jobs: Arc<InMemoryJobStore>,
        ledger: Arc<InMemoryWebhookLedger>,
        provider: Arc<FakeProvider>,
        records: RecordStore,
        processor: WebhookEventProcessor,
    }

    fn harness() -> Harness {
        let videos = Arc::new(InMemoryVideoStore::new());
        let jobs = Arc::new(InMemoryJobStore::new());
        let ledger = Arc::new(InMemoryWebhookLedger::new());
        let provider = Arc::new(FakeProvider::new());
        let records = RecordStore::new(videos.clone(), 2);
        let thumbnails = Arc::new(ThumbnailChain::new(
            provider.clone(),
            records.clone(),
            ThumbnailChainConfig {
                tier_timeout: Duration::from_secs(5),
                placeholder_url: "/static/video-placeholder.svg".to_string(),
                synthesized_enabled: true,
            },
        ));
        let reconciler = Reconciler::new(records.clone(), provider.clone(), thumbnails);
        let processor = WebhookEventProcessor::new(
            reconciler,
            jobs.clone(),
            ledger.clone(),
            EventProcessorConfig {
                lookup_retries: 3,
                lookup_backoff: Duration::from_millis(100),
            },
        );
        Harness {
            videos,
            jobs,
            ledger,
            provider,
            records,
            processor,
        }
    }

    fn asset_event(event_type: &str, data: serde_json::Value) -> Vec<u8> {
        let id = data["id"].as_str().unwrap_or_default().to_string();
        json!({
            "type": event_type,
            "object": { "type": "asset", "id": id },
            "data": data,
        })
        .to_string()
        .into_bytes()
    }

    fn ready_event(asset_id: &str) -> Vec<u8> {
        asset_event(
            "video.asset.ready",
            serde_json::to_value(ready_asset(asset_id, "pb-1")).unwrap(),
        )
    }

    async fn processing_record(h: &Harness, asset_id: &str) -> VideoRecord {
        let record = h.records.create(&sample_new_video(Some(asset_id))).await.unwrap();
        h.records
            .attach_external_asset(record.id, asset_id, Some("pb-1"))
            .await
            .unwrap();
        h.records
            .transition(record.id, VideoStatus::Processing)
            .await
            .unwrap()
            .into_record()
    }

    #[tokio::test]
    async fn test_ready_event_applies_once() {
        let h = harness();
        let record = processing_record(&h, "asset-1").await;
        h.jobs
            .create_job(NewJob::inline(record.id, JobType::AssetCreation))
            .await
            .unwrap();

        let body = ready_event("asset-1");
        let first = h.processor.process(&body).await.unwrap();
        let second = h.processor.process(&body).await.unwrap();

        assert_eq!(first, EventDisposition::Applied);
        assert_eq!(second, EventDisposition::Duplicate);

        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(stored.status, VideoStatus::Ready);
        assert_eq!(stored.duration_seconds, Some(12.0));
        assert_eq!(stored.thumbnail_tier, Some(ThumbnailTier::ProviderFrame));
        assert_eq!(
            h.jobs.of_type(record.id, JobType::AssetCreation)[0].status,
            JobStatus::Completed
        );
        assert_eq!(h.ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_late_error_does_not_regress_ready_record() {
        let h = harness();
        let record = processing_record(&h, "asset-1").await;
        h.processor.process(&ready_event("asset-1")).await.unwrap();
        let ready_at = h.videos.snapshot(record.id).unwrap().ready_at;

        let errored = asset_event(
            "video.asset.errored",
            serde_json::to_value(errored_asset("asset-1")).unwrap(),
        );
        let disposition = h.processor.process(&errored).await.unwrap();

        assert_eq!(disposition, EventDisposition::Ignored);
        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(stored.status, VideoStatus::Ready);
        assert_eq!(stored.ready_at, ready_at);
    }

    #[tokio::test]
    async fn test_errored_event_with_fallback_thumbnail_degrades() {
        let h = harness();
        let record = processing_record(&h, "asset-1").await;
        let errored = asset_event(
            "video.asset.errored",
            serde_json::to_value(errored_asset("asset-1")).unwrap(),
        );

        assert_eq!(
            h.processor.process(&errored).await.unwrap(),
            EventDisposition::Applied
        );
        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(stored.status, VideoStatus::Processing);
        assert!(stored.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_retries_cover_lagging_reads() {
        let h = harness();
        let record = processing_record(&h, "asset-1").await;
        h.videos.hide_from_next_lookups(2);

        let disposition = h.processor.process(&ready_event("asset-1")).await.unwrap();

        assert_eq!(disposition, EventDisposition::Applied);
        assert_eq!(h.videos.snapshot(record.id).unwrap().status, VideoStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_asset_is_orphaned_without_creating_a_record() {
        let h = harness();
        let before = h.videos.insert_calls();

        let disposition = h.processor.process(&ready_event("asset-404")).await.unwrap();

        assert_eq!(disposition, EventDisposition::Orphaned);
        assert_eq!(h.videos.insert_calls(), before);
        assert!(h.videos.is_empty());
        assert_eq!(h.ledger.outcomes(), vec![Some(WebhookOutcome::Orphaned)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphaned_delivery_is_reprocessed_on_redelivery() {
        let h = harness();
        let body = ready_event("asset-9");
        assert_eq!(
            h.processor.process(&body).await.unwrap(),
            EventDisposition::Orphaned
        );

        let record = processing_record(&h, "asset-9").await;
        assert_eq!(
            h.processor.process(&body).await.unwrap(),
            EventDisposition::Applied
        );
        assert_eq!(h.videos.snapshot(record.id).unwrap().status, VideoStatus::Ready);
    }

    #[tokio::test]
    async fn test_passthrough_claims_record_awaiting_attach() {
        let h = harness();
        let record = h.records.create(&sample_new_video(None)).await.unwrap();
        let mut asset = ready_asset("asset-5", "pb-5");
        asset.passthrough = Some(record.id.to_string());

        let body = asset_event("video.asset.ready", serde_json::to_value(asset).unwrap());
        assert_eq!(
            h.processor.process(&body).await.unwrap(),
            EventDisposition::Applied
        );

        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(stored.external_asset_id.as_deref(), Some("asset-5"));
        assert_eq!(stored.status, VideoStatus::Ready);
        assert_eq!(h.videos.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_asset_for_attached_record_stays_orphaned() {
        let h = harness();
        let record = processing_record(&h, "asset-1").await;
        let mut duplicate = ready_asset("asset-2", "pb-2");
        duplicate.passthrough = Some(record.id.to_string());

        let body = asset_event("video.asset.ready", serde_json::to_value(duplicate).unwrap());
        assert_eq!(
            h.processor.process(&body).await.unwrap(),
            EventDisposition::Orphaned
        );

        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(stored.external_asset_id.as_deref(), Some("asset-1"));
        assert_eq!(stored.status, VideoStatus::Processing);
    }

    #[tokio::test]
    async fn test_created_event_moves_pending_record_to_processing() {
        let h = harness();
        let record = h
            .records
            .create(&sample_new_video(Some("asset-3")))
            .await
            .unwrap();
        let body = asset_event(
            "video.asset.created",
            serde_json::to_value(preparing_asset("asset-3", "pb-3")).unwrap(),
        );

        assert_eq!(
            h.processor.process(&body).await.unwrap(),
            EventDisposition::Applied
        );

        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(stored.status, VideoStatus::Processing);
        assert_eq!(stored.external_playback_id.as_deref(), Some("pb-3"));
        assert_eq!(stored.external_status.as_deref(), Some("preparing"));
    }

    #[tokio::test]
    async fn test_stale_created_event_leaves_ready_record_ready() {
        let h = harness();
        let record = processing_record(&h, "asset-1").await;
        h.processor.process(&ready_event("asset-1")).await.unwrap();
        let ready = h.videos.snapshot(record.id).unwrap();

        let stale = asset_event(
            "video.asset.created",
            serde_json::to_value(preparing_asset("asset-1", "pb-1")).unwrap(),
        );
        assert_eq!(
            h.processor.process(&stale).await.unwrap(),
            EventDisposition::Ignored
        );

        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(stored.status, VideoStatus::Ready);
        assert_eq!(stored.external_status, ready.external_status);
        assert_eq!(stored.ready_at, ready.ready_at);
        assert_eq!(
            h.ledger.outcomes(),
            vec![Some(WebhookOutcome::Applied), Some(WebhookOutcome::Ignored)]
        );
    }

    #[tokio::test]
    async fn test_static_renditions_ready_sets_download_url() {
        let h = harness();
        let record = processing_record(&h, "asset-1").await;
        let body = asset_event(
            "video.asset.static_renditions.ready",
            serde_json::to_value(preparing_asset("asset-1", "pb-1")).unwrap(),
        );

        assert_eq!(
            h.processor.process(&body).await.unwrap(),
            EventDisposition::Applied
        );

        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(
            stored.download_url.as_deref(),
            Some("https://stream.test/pb-1/capped-1080p.mp4")
        );
        assert_eq!(stored.status, VideoStatus::Processing);
    }

    #[tokio::test]
    async fn test_text_track_ready_stores_captions_and_transcript() {
        let h = harness();
        let record = processing_record(&h, "asset-1").await;
        let job = h
            .jobs
            .create_job(NewJob::inline(record.id, JobType::CaptionGeneration))
            .await
            .unwrap();
        h.jobs
            .mark_awaiting_callback(job.id, Some("track-1"))
            .await
            .unwrap();
        h.provider.set_text(
            "https://stream.test/pb-1/text/track-1.vtt",
            "WEBVTT\n\n1\n00:00.000 --> 00:02.000\nHello <b>there</b>\n\n2\n00:02.000 --> 00:04.000\nwelcome back\n",
        );

        let body = json!({
            "type": "video.asset.track.ready",
            "data": { "id": "track-1", "type": "text", "asset_id": "asset-1", "status": "ready" }
        })
        .to_string();
        assert_eq!(
            h.processor.process(body.as_bytes()).await.unwrap(),
            EventDisposition::Applied
        );

        let stored = h.videos.snapshot(record.id).unwrap();
        assert_eq!(
            stored.captions_ref.as_deref(),
            Some("https://stream.test/pb-1/text/track-1.vtt")
        );
        assert_eq!(stored.transcript_text.as_deref(), Some("Hello there welcome back"));
        assert_eq!(
            h.jobs.get_job(job.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_unhandled_event_types_are_ignored() {
        let h = harness();
        let body = json!({ "type": "video.upload.created", "data": { "id": "upload-1" } }).to_string();
        assert_eq!(
            h.processor.process(body.as_bytes()).await.unwrap(),
            EventDisposition::Ignored
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_input() {
        let h = harness();
        let err = h.processor.process(b"not json").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(h.ledger.is_empty());
    }

    #[test]
    fn test_vtt_to_text_drops_timing_and_markup() {
        let vtt = "WEBVTT\n\nNOTE generated\nby provider\n\n00:00.000 --> 00:01.000\n<v Speaker>Hi</v>\n";
        assert_eq!(vtt_to_text(vtt), "Hi");
    }
}
