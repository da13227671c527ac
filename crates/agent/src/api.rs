//! HTTP API: the authenticated snapshot, health checks and Prometheus metrics

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use expose_lib::{
    health::{ComponentStatus, HealthRegistry},
    StatusCache,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Header carrying the shared secret
pub const AUTH_HEADER: &str = "x-conduit-auth";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cache: StatusCache,
    pub health_registry: HealthRegistry,
    auth_secret: String,
}

impl AppState {
    pub fn new(
        cache: StatusCache,
        health_registry: HealthRegistry,
        auth_secret: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            health_registry,
            auth_secret: auth_secret.into(),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(provided) = headers.get(AUTH_HEADER) else {
            return false;
        };
        provided
            .as_bytes()
            .ct_eq(self.auth_secret.as_bytes())
            .into()
    }
}

/// Latest snapshot - 401 without a valid secret, 503 before the first cycle
async fn status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        warn!("Rejected status request with missing or invalid auth header");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    match state.cache.latest().await {
        Some(snapshot) => Json(snapshot.as_ref()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no snapshot available yet" })),
        )
            .into_response(),
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a snapshot is published
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(
    addr: String,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
