//! API constants
//!
//! Routes and the OpenAPI path annotations share the `/api/v0` prefix.

/// API base path prefix (version-independent)
pub const API_BASE: &str = "/api";

/// Current API version
pub const API_VERSION: &str = "v0";

/// Versioned prefix every route is mounted under.
pub const API_PREFIX: &str = "/api/v0";

/// Header operators present when `OPERATOR_API_KEY` is configured.
pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

/// Upper bound on intake and webhook request bodies. Uploads never pass through this service.
pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Server-wide concurrency cap.
pub const HTTP_CONCURRENCY_LIMIT: usize = 10_000;
