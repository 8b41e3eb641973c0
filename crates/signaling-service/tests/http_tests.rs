//! Routes served on the HTTP listener.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::secret::SecretString;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use signaling_service::server::{ServerOptions, SignalingServer};
use signaling_service::webhook::{WebhookReceiver, WEBHOOK_PATH};
use signaling_test_utils::{MockNegotiatorFactory, MockSessionStore};
use std::sync::Arc;
use tower::util::ServiceExt;

fn server(options: ServerOptions) -> SignalingServer {
    SignalingServer::new(
        Arc::new(MockSessionStore::new()),
        Arc::new(MockNegotiatorFactory::new()),
        options,
    )
}

async fn get(server: &SignalingServer, uri: &str) -> StatusCode {
    server
        .http_router()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_probes_follow_health_state() {
    let server = server(ServerOptions::default());

    assert_eq!(get(&server, "/healthz").await, StatusCode::OK);
    assert_eq!(get(&server, "/livez").await, StatusCode::OK);
    assert_eq!(get(&server, "/readyz").await, StatusCode::SERVICE_UNAVAILABLE);

    server.health().set_ready();
    assert_eq!(get(&server, "/readyz").await, StatusCode::OK);

    server.health().set_not_ready();
    assert_eq!(get(&server, "/readyz").await, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_optional_routes_absent_by_default() {
    let server = server(ServerOptions::default());

    assert_eq!(get(&server, "/metrics").await, StatusCode::NOT_FOUND);

    let response = server
        .http_router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(WEBHOOK_PATH)
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_route_renders_exposition() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let server = server(ServerOptions {
        metrics: Some(recorder.handle()),
        ..ServerOptions::default()
    });

    let response = server
        .http_router()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(std::str::from_utf8(&body).is_ok());
}

#[tokio::test]
async fn test_webhook_route_mounted_when_configured() {
    let server = server(ServerOptions {
        webhook: Some(Arc::new(WebhookReceiver::new(
            "APIkey",
            SecretString::from("webhook-secret"),
        ))),
        ..ServerOptions::default()
    });

    let response = server
        .http_router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(WEBHOOK_PATH)
                .body(Body::from(r#"{"event":"room_finished"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
