//! Ops listener tests: health and metrics routes.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Harness, TestMetadata};
use serde_json::Value;
use sunset_core::config::AppConfig;
use sunset_server::create_router;
use sunset_server::metrics::register_metrics;
use tower::ServiceExt;

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_health_ok() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let h = Harness::new(metadata.store());
    let router = create_router(h.state.clone());

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_health_unavailable_when_store_closed() {
    let metadata = TestMetadata::new().await.unwrap();
    let h = Harness::new(metadata.store());
    let router = create_router(h.state.clone());

    metadata.pool().close().await;
    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "unavailable");
}

#[tokio::test]
async fn test_metrics_exposes_lifecycle_counters() {
    register_metrics();
    let metadata = TestMetadata::in_memory().await.unwrap();
    let h = Harness::new(metadata.store());
    let (user, _) = h.account("metrics").await;
    h.state.initiator.request_deletion(user).await.unwrap();

    let router = create_router(h.state.clone());
    let (status, body) = get(&router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("sunset_deletions_requested_total"));
}

#[tokio::test]
async fn test_metrics_route_disabled() {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let mut config = AppConfig::for_testing();
    config.server.metrics_enabled = false;
    let h = Harness::with_config(metadata.store(), config);
    let router = create_router(h.state.clone());

    let (status, _) = get(&router, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
