use reelay_core::AppError;
use thiserror::Error;

/// Failures talking to the external processing provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network failure, timeout, 5xx or rate limiting. Worth retrying.
    #[error("Provider temporarily unavailable: {0}")]
    Transient(String),

    #[error("Provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Provider resource not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by provider: {0}")]
    Unsupported(&'static str),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => ProviderError::NotFound(message),
            429 | 500..=599 => ProviderError::Transient(format!("HTTP {}: {}", status, message)),
            _ => ProviderError::Rejected { status, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Transient(err.to_string())
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::Provider(err.to_string())
    }
}
