//! Reelay persistence layer
//!
//! PostgreSQL repositories for video records, processing jobs and the webhook
//! ledger, plus the idempotency guard that owns every write to a video record.

pub mod db;

pub use db::*;
