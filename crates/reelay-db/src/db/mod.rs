//! Database repositories
//!
//! Every repository sits behind a trait so the processing crates can run
//! against in-memory stores in tests.

pub mod job;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod record_store;
pub mod video;
pub mod webhook_ledger;

pub use job::{submit_job, JobRepository, JobSettlement, JobStore, NewJob, NEW_JOB_CHANNEL};
pub use record_store::RecordStore;
pub use video::{PgVideoRepository, StatusChange, VideoStore};
pub use webhook_ledger::{LedgerEntry, PgWebhookLedger, WebhookLedger};

#[cfg(any(test, feature = "test-helpers"))]
pub use memory::{InMemoryJobStore, InMemoryVideoStore, InMemoryWebhookLedger};
