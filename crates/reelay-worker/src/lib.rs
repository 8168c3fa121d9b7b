//! Reelay Worker
//!
//! Database-backed job queue: claims `ProcessingJob` rows, dispatches them to
//! the API's handlers, retries with capped backoff and reaps stale jobs.

pub mod context;
pub mod queue;

pub use context::{empty_context_weak, JobHandlerContext, JobOutcome};
pub use queue::{JobQueue, JobQueueConfig, MAX_RETRY_BACKOFF_SECS};
