//! Route configuration and setup

use crate::constants::{API_PREFIX, HTTP_CONCURRENCY_LIMIT, MAX_REQUEST_BODY_BYTES};
use crate::handlers;
use crate::middleware::operator_auth_middleware;
use crate::state::AppState;
use axum::{
    http::Method,
    routing::{get, post},
    Json, Router,
};
use reelay_core::Config;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors();
    tracing::info!(
        environment = config.environment(),
        http_concurrency_limit = HTTP_CONCURRENCY_LIMIT,
        max_request_body_bytes = MAX_REQUEST_BODY_BYTES,
        "HTTP layers configured"
    );

    let admin_routes = admin_routes().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        operator_auth_middleware,
    ));

    let app = public_routes()
        .nest(&format!("{}/admin", API_PREFIX), admin_routes)
        .layer(ConcurrencyLimitLayer::new(HTTP_CONCURRENCY_LIMIT))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Intake is called server-to-server after the storage upload; any origin may call it.
fn setup_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/live", get(handlers::health::liveness_check))
        .route(
            "/api/openapi.json",
            get(|| async { Json(crate::api_doc::get_openapi_spec()) }),
        )
        .route(
            &format!("{}/videos", API_PREFIX),
            post(handlers::videos::create_video),
        )
        .route(
            &format!("{}/videos/{{id}}", API_PREFIX),
            get(handlers::videos::get_video),
        )
        .route(
            &format!("{}/videos/{{id}}/jobs", API_PREFIX),
            get(handlers::videos::list_video_jobs),
        )
        .route(
            &format!("{}/webhooks/provider", API_PREFIX),
            post(handlers::webhooks::provider_webhook),
        )
}

/// Operator routes, mounted under `/api/v0/admin`.
fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/thumbnails/reprocess",
            post(handlers::admin::reprocess_thumbnails),
        )
        .route("/videos/{id}/retry", post(handlers::admin::retry_video))
}
