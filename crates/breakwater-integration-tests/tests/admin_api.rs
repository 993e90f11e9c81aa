//! Integration tests for the admin HTTP API over a live stack
//!
//! Handler-level behavior is covered in the api crate itself; these
//! tests drive the router after real outage episodes, so the admin
//! surface is observed against state the resilience components
//! actually produced.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use breakwater_core::EnqueueRequest;
use common::{dep, stack, store_payload, ARCHIVE, PRIMARY};
use serde_json::{json, Value};
use tower::ServiceExt; // For `oneshot`

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Verify that a fresh multi-dependency stack reports healthy with
/// every circuit closed and no read-only mode.
#[tokio::test]
async fn test_health_reports_healthy_for_a_fresh_stack() {
    let h = stack(&[PRIMARY, ARCHIVE]).await;
    let app = breakwater_api::create_router(h.app_state());

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["read_only"], false);
    assert!(body["version"].is_string());

    let dependencies = body["dependencies"].as_array().unwrap();
    assert_eq!(dependencies.len(), 2);
    for entry in dependencies {
        assert_eq!(entry["status"], "healthy");
        assert_eq!(entry["circuit_state"], "closed");
    }
}

/// Verify that an on-demand probe batch against a dead dependency
/// flips the health overview to 503 with the degradation visible.
#[tokio::test]
async fn test_health_answers_503_once_a_dependency_degrades() {
    let h = stack(&[PRIMARY]).await;
    h.objects_for(PRIMARY).set_unavailable(true);
    let app = breakwater_api::create_router(h.app_state());

    let response = app
        .clone()
        .oneshot(post_json("/health/check", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let batch = body_json(response).await;
    assert_eq!(batch["results"][0]["dependency"], "blob-primary");
    assert_eq!(batch["results"][0]["status"], "unhealthy");

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["read_only"], true);

    let entry = &body["dependencies"][0];
    assert_eq!(entry["status"], "degraded");
    assert_eq!(entry["circuit_state"], "open");
    assert!(entry["degradation_reason"].is_string());
}

/// Verify that an administrative reset closes a circuit that real
/// failures opened, and the overview reflects it.
#[tokio::test]
async fn test_breaker_reset_closes_a_circuit_opened_by_failures() {
    let h = stack(&[PRIMARY]).await;
    let primary = h.objects_for(PRIMARY);
    primary.set_unavailable(true);
    let app = breakwater_api::create_router(h.app_state());

    app.clone()
        .oneshot(post_json("/health/check", json!({})))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/health/circuit-breaker"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["breakers"][0]["dependency"], "blob-primary");
    assert_eq!(body["breakers"][0]["state"], "open");

    primary.set_unavailable(false);
    let response = app
        .clone()
        .oneshot(post_json(
            "/health/circuit-breaker/reset",
            json!({ "dependency": "blob-primary" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "closed");

    let response = app.oneshot(get("/health/circuit-breaker")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["breakers"][0]["state"], "closed");
}

/// Verify that queue statistics track an enqueue-then-drain cycle
/// through the endpoint.
#[tokio::test]
async fn test_queue_stats_reflect_enqueue_and_drain() {
    let h = stack(&[PRIMARY]).await;
    let app = breakwater_api::create_router(h.app_state());

    for key in ["reports/a", "reports/b"] {
        h.queue
            .enqueue(EnqueueRequest::new(dep(PRIMARY), store_payload(key)))
            .await
            .unwrap();
    }

    let response = app.clone().oneshot(get("/queue/stats")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["pending"], 2);
    assert_eq!(body["depth"], 2);
    assert_eq!(body["completed"], 0);

    h.drainer.drain_once().await.unwrap();

    let response = app.oneshot(get("/queue/stats")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["pending"], 0);
    assert_eq!(body["depth"], 0);
    assert_eq!(body["completed"], 2);
}

/// Verify that the Prometheus endpoint renders the episode the stack
/// just went through.
#[tokio::test]
async fn test_metrics_render_the_outage_episode() {
    let h = stack(&[PRIMARY]).await;
    h.objects_for(PRIMARY).set_unavailable(true);
    let app = breakwater_api::create_router(h.app_state());

    app.clone()
        .oneshot(post_json("/health/check", json!({})))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("breakwater_circuit_state{dependency=\"blob-primary\"} 1"));
    assert!(text.contains("breakwater_degraded_mode_active 1"));
    assert!(text.contains("breakwater_http_requests_total"));
    assert!(text.contains("breakwater_probe_results_total"));
}
