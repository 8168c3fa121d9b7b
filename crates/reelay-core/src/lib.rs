//! Reelay Core Library
//!
//! Domain models, error types and configuration shared by every Reelay crate.

pub mod config;
pub mod error;
pub mod job_error;
pub mod models;

// Re-export commonly used types
pub use config::{Config, ReelayConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use job_error::{is_unrecoverable, JobError, JobResultExt};
