//! Reelay Processing Library
//!
//! Mode selection, metadata estimation, the thumbnail fallback chain and the
//! two paths that reconcile provider results into records: the synchronous
//! coordinator and the webhook event processor.

pub mod coordinator;
pub mod estimator;
pub mod mode;
pub mod reconcile;
pub mod reprocess;
pub mod thumbnail;
pub mod webhook;

pub use coordinator::{input_url, CoordinatorConfig, CoordinatorOutcome, SyncCoordinator};
pub use estimator::estimate;
pub use mode::{select_mode, ModeSelectorConfig};
pub use reconcile::{ReadyFollowUps, Reconciler, EXTERNAL_STATUS_ERRORED};
pub use reprocess::{ReprocessBatchReport, ThumbnailReprocessor};
pub use thumbnail::{
    ThumbnailChain, ThumbnailChainConfig, ThumbnailInput, ThumbnailResolution, ThumbnailStrategy,
};
pub use webhook::{vtt_to_text, EventDisposition, EventProcessorConfig, WebhookEventProcessor};
