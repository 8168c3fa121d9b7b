//! Reelay Provider Library
//!
//! Client for the external processing provider: asset creation and polling,
//! caption requests, callback parsing and signature verification.

pub mod asset;
pub mod error;
pub mod events;
#[cfg(any(test, feature = "test-helpers"))]
pub mod fake;
pub mod http;
pub mod provider;
pub mod signature;

pub use asset::{AssetSnapshot, AssetStatus, AssetTrack, PlaybackId};
pub use error::ProviderError;
pub use events::{payload_hash, EventKind, EventParseError, ProviderEvent};
pub use http::{HttpProvider, HttpProviderConfig};
pub use provider::ProcessingProvider;
pub use signature::{SignatureError, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER};

#[cfg(any(test, feature = "test-helpers"))]
pub use fake::FakeProvider;
