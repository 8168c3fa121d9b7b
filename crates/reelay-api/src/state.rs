//! Application state shared by handlers and job handlers.

use reelay_core::Config;
use reelay_db::{JobStore, RecordStore, WebhookLedger};
use reelay_processing::{
    Reconciler, SyncCoordinator, ThumbnailChain, ThumbnailReprocessor, WebhookEventProcessor,
};
use reelay_provider::ProcessingProvider;
use reelay_worker::JobQueue;
use std::sync::Arc;

use crate::services::intake::IntakeService;

/// Stores, provider client and the processing components built over them.
///
/// The job queue holds a weak reference back to this state, so the worker
/// never keeps it alive on its own.
pub struct AppState {
    pub config: Config,
    pub records: RecordStore,
    pub jobs: Arc<dyn JobStore>,
    pub ledger: Arc<dyn WebhookLedger>,
    pub provider: Arc<dyn ProcessingProvider>,
    pub thumbnails: Arc<ThumbnailChain>,
    pub reconciler: Reconciler,
    pub coordinator: Arc<SyncCoordinator>,
    pub webhooks: Arc<WebhookEventProcessor>,
    pub reprocessor: Arc<ThumbnailReprocessor>,
    pub intake: IntakeService,
    pub job_queue: JobQueue,
}

impl AppState {
    /// Secret for provider callback signatures; `None` disables verification.
    pub fn webhook_signing_secret(&self) -> Option<&str> {
        self.config.webhook_signing_secret()
    }

    pub fn operator_api_key(&self) -> Option<&str> {
        self.config.operator_api_key()
    }
}
