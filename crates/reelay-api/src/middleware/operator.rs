//! Operator key check for the admin routes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use reelay_core::AppError;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::constants::OPERATOR_KEY_HEADER;
use crate::error::HttpAppError;
use crate::state::AppState;

/// Constant-time comparison of two strings to prevent timing attacks on key validation.
fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Rejects requests without the configured operator key. With no key
/// configured the admin routes are closed entirely.
pub async fn operator_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.operator_api_key() else {
        tracing::warn!(path = %request.uri().path(), "Admin request refused, no operator key configured");
        return HttpAppError(AppError::Unauthorized(
            "Admin endpoints are disabled".to_string(),
        ))
        .into_response();
    };

    let provided = request
        .headers()
        .get(OPERATOR_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    match provided {
        Some(key) if secure_compare(key, expected) => next.run(request).await,
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Admin request with invalid operator key");
            HttpAppError(AppError::Unauthorized("Invalid operator key".to_string())).into_response()
        }
        None => HttpAppError(AppError::Unauthorized(format!(
            "Missing {} header",
            OPERATOR_KEY_HEADER
        )))
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_compare() {
        assert!(secure_compare("op-key", "op-key"));
        assert!(!secure_compare("op-key", "op-kez"));
        assert!(!secure_compare("op", "op-key"));
    }
}
