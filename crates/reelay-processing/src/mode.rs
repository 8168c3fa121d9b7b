//! Synchronous vs asynchronous processing decision.

use reelay_core::models::ProcessingMode;
use reelay_core::Config;

#[derive(Debug, Clone)]
pub struct ModeSelectorConfig {
    pub size_threshold_bytes: u64,
    /// Lowercase MIME types the provider ingests quickly.
    pub fast_mime_types: Vec<String>,
}

impl ModeSelectorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            size_threshold_bytes: config.sync_size_threshold_bytes(),
            fast_mime_types: config
                .sync_fast_mime_types()
                .iter()
                .map(|m| m.trim().to_lowercase())
                .collect(),
        }
    }
}

fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Synchronous only for small files in a fast container; everything else is asynchronous.
pub fn select_mode(size_bytes: u64, mime_type: &str, config: &ModeSelectorConfig) -> ProcessingMode {
    let mime = essence(mime_type);
    let fast = config.fast_mime_types.iter().any(|m| *m == mime);
    if fast && size_bytes <= config.size_threshold_bytes {
        ProcessingMode::Synchronous
    } else {
        ProcessingMode::Asynchronous
    }
}
