//! Service initialization
//!
//! Builds the stores, the provider client and the processing components, and
//! wires the job queue back to the application state.

use anyhow::Result;
use reelay_core::config::MAX_REPROCESS_BATCH_SIZE;
use reelay_core::Config;
use reelay_db::{
    JobRepository, JobStore, PgVideoRepository, PgWebhookLedger, RecordStore, VideoStore,
    WebhookLedger,
};
use reelay_processing::{
    CoordinatorConfig, EventProcessorConfig, ReadyFollowUps, Reconciler, SyncCoordinator,
    ThumbnailChain, ThumbnailChainConfig, ThumbnailReprocessor, WebhookEventProcessor,
};
use reelay_provider::{HttpProvider, HttpProviderConfig, ProcessingProvider};
use reelay_worker::{JobHandlerContext, JobQueue, JobQueueConfig};
use sqlx::PgPool;
use std::sync::{Arc, Weak};

use crate::services::intake::{IntakeConfig, IntakeService};
use crate::state::AppState;

/// Backing stores and provider the state is built over.
pub struct StateComponents {
    pub videos: Arc<dyn VideoStore>,
    pub jobs: Arc<dyn JobStore>,
    pub ledger: Arc<dyn WebhookLedger>,
    pub provider: Arc<dyn ProcessingProvider>,
    /// Enables LISTEN/NOTIFY wakeups for the job workers.
    pub pool: Option<PgPool>,
}

/// Postgres-backed stores and the HTTP provider client.
pub async fn initialize_services(config: &Config, pool: PgPool) -> Result<Arc<AppState>> {
    let provider = HttpProvider::new(HttpProviderConfig::from_config(config))?;
    tracing::info!(base_url = %config.provider_base_url(), "Processing provider client initialized");

    let components = StateComponents {
        videos: Arc::new(PgVideoRepository::new(pool.clone())),
        jobs: Arc::new(JobRepository::new(pool.clone())),
        ledger: Arc::new(PgWebhookLedger::new(pool.clone())),
        provider: Arc::new(provider),
        pool: Some(pool),
    };
    Ok(build_state(config.clone(), components))
}

/// Assemble the application state and start the job workers.
pub fn build_state(config: Config, components: StateComponents) -> Arc<AppState> {
    let StateComponents {
        videos,
        jobs,
        ledger,
        provider,
        pool,
    } = components;

    let records = RecordStore::new(videos, config.find_or_create_max_attempts());
    let thumbnails = Arc::new(ThumbnailChain::new(
        provider.clone(),
        records.clone(),
        ThumbnailChainConfig::from_config(&config),
    ));
    let reconciler = Reconciler::new(records.clone(), provider.clone(), thumbnails.clone())
        .with_follow_ups(jobs.clone(), ReadyFollowUps::from_config(&config));
    let coordinator = Arc::new(SyncCoordinator::new(
        reconciler.clone(),
        jobs.clone(),
        CoordinatorConfig::from_config(&config),
    ));
    let webhooks = Arc::new(WebhookEventProcessor::new(
        reconciler.clone(),
        jobs.clone(),
        ledger.clone(),
        EventProcessorConfig::from_config(&config),
    ));
    let reprocessor = Arc::new(ThumbnailReprocessor::new(
        records.clone(),
        thumbnails.clone(),
        MAX_REPROCESS_BATCH_SIZE,
    ));

    Arc::new_cyclic(|weak: &Weak<AppState>| {
        let context: Weak<dyn JobHandlerContext> = weak.clone();
        let job_queue = JobQueue::new(
            jobs.clone(),
            Some(ledger.clone()),
            JobQueueConfig::from_config(&config),
            context,
            pool,
        );
        tracing::info!(
            max_workers = config.job_queue_max_workers(),
            "Job queue started"
        );

        let intake = IntakeService::new(
            records.clone(),
            thumbnails.clone(),
            coordinator.clone(),
            job_queue.clone(),
            IntakeConfig::from_config(&config),
        );

        AppState {
            config,
            records,
            jobs,
            ledger,
            provider,
            thumbnails,
            reconciler,
            coordinator,
            webhooks,
            reprocessor,
            intake,
            job_queue,
        }
    })
}
