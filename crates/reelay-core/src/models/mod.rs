//! Data models for the orchestrator
//!
//! Video records, the background jobs that act on them and the webhook ledger.

mod job;
mod video;
mod webhook;

pub use job::*;
pub use video::*;
pub use webhook::*;
