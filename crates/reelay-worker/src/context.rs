//! Job handler context trait
//!
//! The API implements this trait for its application state. The worker calls
//! `dispatch_job` for each claimed job; the implementation matches on job type.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

use reelay_core::models::ProcessingJob;

/// How a handler left its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The provider accepted the work; a callback settles the job.
    AwaitingCallback { external_job_id: Option<String> },
}

/// Context for job dispatch.
///
/// The worker holds a weak reference so the queue never keeps the
/// application state alive on its own.
#[async_trait]
pub trait JobHandlerContext: Send + Sync {
    async fn dispatch_job(self: Arc<Self>, job: &ProcessingJob) -> Result<JobOutcome>;
}

struct NoopContext;

#[async_trait]
impl JobHandlerContext for NoopContext {
    async fn dispatch_job(self: Arc<Self>, _job: &ProcessingJob) -> Result<JobOutcome> {
        Err(anyhow!("NoopContext: no handler context available"))
    }
}

/// A weak reference that never upgrades. Use while building state that the
/// real context will replace.
pub fn empty_context_weak() -> Weak<dyn JobHandlerContext> {
    let n: Arc<dyn JobHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
