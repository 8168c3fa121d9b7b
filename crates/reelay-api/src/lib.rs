//! Reelay API
//!
//! HTTP surface of the video ingestion service: upload intake, status reads,
//! provider callbacks and operator maintenance, plus the background job
//! handlers the worker pool dispatches to.

mod api_doc;
pub mod constants;
pub mod error;
mod handlers;
mod job_dispatch;
pub mod job_handlers;
mod middleware;
pub mod services;
pub mod setup;
pub mod state;
mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use job_handlers::JobHandler;
pub use services::intake::{IntakeRequest, IntakeResponse, IntakeService};
pub use state::AppState;
