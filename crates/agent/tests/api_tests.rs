//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use conduit_expose::api::{create_router, AppState, AUTH_HEADER};
use expose_lib::{
    health::{components, HealthRegistry},
    observability::AgentMetrics,
    StatusCache, StatusResponse,
};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "correct-horse";

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::RUNTIME).await;
    health_registry.register(components::COLLECTOR).await;

    let state = Arc::new(AppState::new(
        StatusCache::new(),
        health_registry,
        SECRET,
    ));
    let router = create_router(state.clone());

    (router, state)
}

fn status_request(secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/status");
    if let Some(secret) = secret {
        builder = builder.header(AUTH_HEADER, secret);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_status_requires_auth_header() {
    let (app, _state) = setup_test_app().await;

    let response = app.oneshot(status_request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn test_status_rejects_wrong_secret() {
    let (app, state) = setup_test_app().await;
    state
        .cache
        .publish(1, StatusResponse::empty("relay-1", 1_700_000_000))
        .await;

    for wrong in ["correct-hors", "correct-horse-battery", ""] {
        let response = app.clone().oneshot(status_request(Some(wrong))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "secret {wrong:?}");
    }
}

#[tokio::test]
async fn test_status_returns_503_before_first_snapshot() {
    let (app, _state) = setup_test_app().await;

    let response = app.oneshot(status_request(Some(SECRET))).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_status_returns_latest_snapshot() {
    let (app, state) = setup_test_app().await;
    state
        .cache
        .publish(1, StatusResponse::empty("relay-1", 1_700_000_000))
        .await;
    state
        .cache
        .publish(2, StatusResponse::empty("relay-1", 1_700_000_015))
        .await;

    let response = app.oneshot(status_request(Some(SECRET))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["server_id"], "relay-1");
    assert_eq!(status["timestamp"], 1_700_000_015);
    assert_eq!(status["total_containers"], 0);
    assert!(status["containers"].as_array().unwrap().is_empty());
    // Absent sections are omitted rather than null
    assert!(status.get("system").is_none());
}

#[tokio::test]
async fn test_health_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::GEOIP, "GeoIP database not available")
        .await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    // Degraded still returns 200 (serving)
    assert_eq!(response.status(), StatusCode::OK);

    let health = json_body(response).await;
    assert_eq!(health["status"], "degraded");
    assert!(health["components"]["geoip"].is_object());
}

#[tokio::test]
async fn test_health_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::RUNTIME, "Docker daemon unreachable")
        .await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_first_publish() {
    let (app, state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["ready"], false);

    state.health_registry.set_ready(true).await;

    let response = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_is_unauthenticated() {
    let (app, _state) = setup_test_app().await;

    let metrics = AgentMetrics::new();
    metrics.observe_cycle_duration(0.2);
    metrics.set_targets_discovered(3);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("conduit_expose_cycle_duration_seconds_bucket"));
    assert!(metrics_text.contains("conduit_expose_targets_discovered"));
}
