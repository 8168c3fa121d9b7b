//! Test helpers: build AppState and router over in-memory stores.
//!
//! Run from workspace root: `cargo test -p reelay-api`. No database or
//! provider account is needed; the provider is a scripted fake.

pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::*;

use axum_test::TestServer;
use reelay_api::constants;
use reelay_api::setup::routes::setup_routes;
use reelay_api::setup::services::{build_state, StateComponents};
use reelay_api::state::AppState;
use reelay_core::models::{ProcessingJob, VideoRecord};
use reelay_core::{is_unrecoverable, Config, ReelayConfig};
use reelay_db::memory::{InMemoryJobStore, InMemoryVideoStore, InMemoryWebhookLedger};
use reelay_db::JobStore;
use reelay_provider::FakeProvider;
use reelay_worker::{JobHandlerContext, JobOutcome};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// API path prefix for tests (e.g. `/api/v0`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

/// Config tuned for tests: short sync deadline, fast webhook lookups and a
/// worker pool that never polls on its own. Tests drive jobs with
/// [`TestApp::run_pending_jobs`].
pub fn test_config() -> ReelayConfig {
    let mut config = ReelayConfig::for_tests();
    config.sync_poll_interval_secs = 1;
    config.sync_deadline_secs = 2;
    config.provider_transient_retries = 1;
    config.webhook_lookup_retries = 1;
    config.webhook_lookup_backoff_ms = 10;
    config.thumbnail_tier_timeout_secs = 1;
    config.job_queue_poll_interval_ms = 3_600_000;
    config
}

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub videos: Arc<InMemoryVideoStore>,
    pub jobs: Arc<InMemoryJobStore>,
    pub ledger: Arc<InMemoryWebhookLedger>,
    pub provider: Arc<FakeProvider>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn record(&self, id: Uuid) -> VideoRecord {
        self.videos
            .snapshot(id)
            .unwrap_or_else(|| panic!("no record {}", id))
    }

    /// Claim and run due jobs the way the worker pool does until none are left.
    /// Retries are rescheduled immediately, and jobs queued along the way run too.
    pub async fn run_pending_jobs(&self) -> Vec<ProcessingJob> {
        let mut ran = Vec::new();
        while let Some(job) = self.jobs.claim_next_job().await.expect("claim job") {
            match self.state.clone().dispatch_job(&job).await {
                Ok(JobOutcome::Completed) => {
                    self.jobs.mark_completed(job.id).await.expect("complete job");
                }
                Ok(JobOutcome::AwaitingCallback { external_job_id }) => {
                    self.jobs
                        .mark_awaiting_callback(job.id, external_job_id.as_deref())
                        .await
                        .expect("park job");
                }
                Err(e) if !is_unrecoverable(&e) && job.can_retry() => {
                    self.jobs
                        .schedule_retry(job.id, &e.to_string(), 0)
                        .await
                        .expect("schedule retry");
                }
                Err(e) => {
                    self.jobs
                        .mark_failed(job.id, &e.to_string())
                        .await
                        .expect("fail job");
                }
            }
            let settled = self.jobs.get_job(job.id).await.expect("get job");
            ran.push(settled.unwrap_or(job));
        }
        ran
    }

    /// Wait for a background webhook task to leave `id` in a state matching `done`.
    pub async fn wait_for_record<F>(&self, id: Uuid, done: F) -> VideoRecord
    where
        F: Fn(&VideoRecord) -> bool,
    {
        for _ in 0..100 {
            if let Some(record) = self.videos.snapshot(id) {
                if done(&record) {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("record {} never reached the expected state", id);
    }

    /// Wait until the webhook ledger holds `count` settled deliveries.
    pub async fn wait_for_ledger(&self, count: usize) {
        for _ in 0..100 {
            let settled = self
                .ledger
                .outcomes()
                .iter()
                .filter(|o| o.is_some())
                .count();
            if settled >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("webhook ledger never settled {} deliveries", count);
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(test_config()).await
}

pub async fn setup_test_app_with(config: ReelayConfig) -> TestApp {
    let config = Config(Box::new(config));
    let videos = Arc::new(InMemoryVideoStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let ledger = Arc::new(InMemoryWebhookLedger::new());
    let provider = Arc::new(FakeProvider::new());

    let state = build_state(
        config.clone(),
        StateComponents {
            videos: videos.clone(),
            jobs: jobs.clone(),
            ledger: ledger.clone(),
            provider: provider.clone(),
            pool: None,
        },
    );
    let router = setup_routes(&config, state.clone()).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        state,
        videos,
        jobs,
        ledger,
        provider,
    }
}
