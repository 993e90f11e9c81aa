//! Tests for the admin HTTP surface, driven through the router.

use super::*;
use axum::body::Body;
use axum::http::Request;
use breakwater_core::{
    BreakerDefaults, CircuitState, DegradationHandler, DependencyPolicy, EnqueueRequest,
    MemoryObjectStore, MemoryResilienceStore, MonitorSettings, ObjectStore, OperationPayload,
    QueueConfig, ResilienceMetrics, ServiceStatus, ServiceStatusRecord,
};
use tower::ServiceExt;

// ============================================================================
// Test harness
// ============================================================================

fn dep() -> DependencyName {
    "blob-primary".parse().unwrap()
}

struct Harness {
    state: AppState,
    store: Arc<MemoryResilienceStore>,
    objects: Arc<MemoryObjectStore>,
}

impl Harness {
    fn app(&self) -> Router {
        create_router(self.state.clone())
    }
}

/// Wire a full subsystem around the in-memory adapters, tracking one
/// dependency named `blob-primary`.
async fn harness() -> Harness {
    let store = Arc::new(MemoryResilienceStore::new());
    let resilience: Arc<dyn ResilienceStore> = Arc::clone(&store) as Arc<dyn ResilienceStore>;
    let metrics = ServiceMetrics::new().unwrap();
    let sink: Arc<dyn ResilienceMetrics> = metrics.clone();

    let registry = Arc::new(BreakerRegistry::new(
        BreakerDefaults::default(),
        Arc::clone(&resilience),
        Arc::clone(&sink),
    ));
    let queue = Arc::new(OperationQueue::new(
        QueueConfig::default(),
        Arc::clone(&resilience),
        Arc::clone(&sink),
    ));
    let degradation = Arc::new(DegradationHandler::new(
        Arc::clone(&resilience),
        Arc::clone(&registry),
        Arc::clone(&queue),
        Arc::clone(&sink),
    ));

    let objects = Arc::new(MemoryObjectStore::new());
    store
        .init_service_status(ServiceStatusRecord::healthy(dep()))
        .await
        .unwrap();

    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&resilience),
        Arc::clone(&registry),
        degradation,
        Arc::clone(&sink),
        vec![DependencyPolicy {
            dependency: dep(),
            store: Arc::clone(&objects) as Arc<dyn ObjectStore>,
            read_only_on_outage: true,
            notify: vec![],
        }],
        MonitorSettings::default(),
    ));

    let state = AppState::new(
        ApiConfig::default(),
        resilience,
        registry,
        monitor,
        queue,
        metrics,
    );
    Harness {
        state,
        store,
        objects,
    }
}

fn get_request(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn read_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Health endpoints
// ============================================================================

/// GET /health lists every tracked dependency and the read-only flag.
#[tokio::test]
async fn test_health_reports_healthy_dependencies() {
    let h = harness().await;

    let response = h.app().oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["read_only"], false);
    assert_eq!(body["dependencies"][0]["dependency"], "blob-primary");
    assert_eq!(body["dependencies"][0]["circuit_state"], "closed");
}

/// GET /health answers 503 with the full report once a dependency is
/// no longer healthy.
#[tokio::test]
async fn test_health_is_503_when_a_dependency_degrades() {
    let h = harness().await;
    let mut record = h.store.service_status(&dep()).await.unwrap().unwrap();
    record.status = ServiceStatus::Degraded;
    h.store.update_service_status(&record).await.unwrap();

    let response = h.app().oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["dependencies"][0]["status"], "degraded");
}

/// POST /health/check runs a probe batch immediately and persists the
/// results.
#[tokio::test]
async fn test_probe_batch_runs_on_demand() {
    let h = harness().await;

    let response = h
        .app()
        .oneshot(post_json("/health/check", serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["results"][0]["dependency"], "blob-primary");
    assert_eq!(body["results"][0]["status"], "healthy");

    let results = h.store.recent_health_results(&dep(), 10).await.unwrap();
    assert_eq!(results.len(), 5);
}

// ============================================================================
// Circuit breaker endpoints
// ============================================================================

/// GET /health/circuit-breaker snapshots every registered breaker.
#[tokio::test]
async fn test_breaker_overview_lists_registered_dependencies() {
    let h = harness().await;
    h.state.registry.breaker_for(&dep());

    let response = h
        .app()
        .oneshot(get_request("/health/circuit-breaker"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["breakers"][0]["dependency"], "blob-primary");
    assert_eq!(body["breakers"][0]["state"], "closed");
    assert_eq!(body["breakers"][0]["total_calls"], 0);
}

/// POST /health/circuit-breaker/reset closes an open circuit.
#[tokio::test]
async fn test_breaker_reset_closes_an_open_circuit() {
    let h = harness().await;
    let breaker = h.state.registry.breaker_for(&dep());
    breaker.force_open(TransitionReason::ForcedOpen).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    let response = h
        .app()
        .oneshot(post_json(
            "/health/circuit-breaker/reset",
            serde_json::json!({ "dependency": "blob-primary" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["state"], "closed");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Resetting an unregistered dependency is 404.
#[tokio::test]
async fn test_breaker_reset_unknown_dependency_is_404() {
    let h = harness().await;

    let response = h
        .app()
        .oneshot(post_json(
            "/health/circuit-breaker/reset",
            serde_json::json!({ "dependency": "blob-backup" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("blob-backup"));
}

/// A dependency name that fails validation is 400.
#[tokio::test]
async fn test_breaker_reset_invalid_name_is_400() {
    let h = harness().await;

    let response = h
        .app()
        .oneshot(post_json(
            "/health/circuit-breaker/reset",
            serde_json::json!({ "dependency": "not a name!" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Alert endpoints
// ============================================================================

/// GET /health/alerts applies severity and active-only filters.
#[tokio::test]
async fn test_alert_filters_apply() {
    let h = harness().await;
    h.store
        .upsert_active_alert(breakwater_core::AlertDraft {
            dependency: dep(),
            alert_type: breakwater_core::AlertType::CircuitOpen,
            severity: breakwater_core::AlertSeverity::Critical,
            message: "circuit open".to_string(),
            details: serde_json::json!({}),
        })
        .await
        .unwrap();
    h.store
        .upsert_active_alert(breakwater_core::AlertDraft {
            dependency: dep(),
            alert_type: breakwater_core::AlertType::SlowResponse,
            severity: breakwater_core::AlertSeverity::Medium,
            message: "slow".to_string(),
            details: serde_json::json!({}),
        })
        .await
        .unwrap();

    let response = h.app().oneshot(get_request("/health/alerts")).await.unwrap();
    let body = read_json(response).await;
    assert_eq!(body["total"], 2);

    let response = h
        .app()
        .oneshot(get_request("/health/alerts?severity=critical"))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["alerts"][0]["alert_type"], "circuit_open");
}

/// Manual alerts upsert while active and can be resolved with notes.
#[tokio::test]
async fn test_manual_alerts_upsert_and_resolve() {
    let h = harness().await;
    let draft = serde_json::json!({
        "dependency": "blob-primary",
        "alert_type": "service_degraded",
        "severity": "high",
        "message": "manual page during incident drill",
    });

    let response = h
        .app()
        .oneshot(post_json("/health/alerts", draft.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = read_json(response).await;
    assert_eq!(first["occurrence_count"], 1);

    let response = h
        .app()
        .oneshot(post_json("/health/alerts", draft))
        .await
        .unwrap();
    let second = read_json(response).await;
    assert_eq!(second["occurrence_count"], 2);
    assert_eq!(second["id"], first["id"]);

    let resolve_path = format!(
        "/health/alerts/{}/resolve",
        first["id"].as_str().unwrap()
    );
    let response = h
        .app()
        .oneshot(post_json(
            &resolve_path,
            serde_json::json!({ "notes": "handled" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let resolved = read_json(response).await;
    assert!(!resolved["resolved_at"].is_null());
    assert_eq!(resolved["resolution_notes"], "handled");

    let response = h
        .app()
        .oneshot(get_request("/health/alerts?active_only=true"))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["total"], 0);
}

/// Resolving an unknown alert id is 404.
#[tokio::test]
async fn test_resolving_an_unknown_alert_is_404() {
    let h = harness().await;
    let path = format!("/health/alerts/{}/resolve", AlertId::new());

    let response = h
        .app()
        .oneshot(post_json(&path, serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// A malformed alert id is 400, not 404.
#[tokio::test]
async fn test_resolving_a_malformed_alert_id_is_400() {
    let h = harness().await;

    let response = h
        .app()
        .oneshot(post_json(
            "/health/alerts/not-a-ulid/resolve",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Configuration endpoints
// ============================================================================

/// PUT /health/config persists the configuration; omitted fields fall
/// back to defaults.
#[tokio::test]
async fn test_monitor_config_roundtrip() {
    let h = harness().await;

    let response = h
        .app()
        .oneshot(put_json(
            "/health/config",
            serde_json::json!({ "enabled": false, "interval_ms": 60000 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["enabled"], false);
    assert_eq!(body["interval_ms"], 60000);
    assert_eq!(body["window_size"], 50);

    let response = h.app().oneshot(get_request("/health/config")).await.unwrap();
    let body = read_json(response).await;
    assert_eq!(body["enabled"], false);
    assert_eq!(body["interval_ms"], 60000);
}

/// GET /health/config falls back to the defaults when nothing was stored.
#[tokio::test]
async fn test_monitor_config_defaults_when_unset() {
    let h = harness().await;

    let response = h.app().oneshot(get_request("/health/config")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["enabled"], true);
    assert_eq!(body["interval_ms"], 30000);
}

/// Out-of-range configuration values are rejected with 400.
#[tokio::test]
async fn test_invalid_monitor_config_is_rejected() {
    let h = harness().await;

    let response = h
        .app()
        .oneshot(put_json(
            "/health/config",
            serde_json::json!({ "interval_ms": 100 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.store.health_check_config().await.unwrap().is_none());
}

// ============================================================================
// Monitoring control
// ============================================================================

/// Start and stop report whether the scheduling state changed.
#[tokio::test]
async fn test_monitoring_start_and_stop() {
    let h = harness().await;

    let response = h
        .app()
        .oneshot(post_json("/monitoring/start", serde_json::json!({})))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["running"], true);
    assert_eq!(body["changed"], true);

    let response = h
        .app()
        .oneshot(post_json("/monitoring/start", serde_json::json!({})))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["changed"], false);

    let response = h
        .app()
        .oneshot(post_json("/monitoring/stop", serde_json::json!({})))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["running"], false);
    assert_eq!(body["changed"], true);
}

// ============================================================================
// Observability endpoints
// ============================================================================

/// GET /queue/stats reflects live queue contents.
#[tokio::test]
async fn test_queue_stats_counts_live_operations() {
    let h = harness().await;
    h.state
        .queue
        .enqueue(EnqueueRequest::new(
            dep(),
            OperationPayload::DeleteObject {
                key: "reports/stale.pdf".to_string(),
            },
        ))
        .await
        .unwrap();

    let response = h.app().oneshot(get_request("/queue/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["pending"], 1);
    assert_eq!(body["depth"], 1);
}

/// GET /ready answers 200 while the store responds.
#[tokio::test]
async fn test_ready_answers_while_the_store_responds() {
    let h = harness().await;

    let response = h.app().oneshot(get_request("/ready")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["ready"], true);
}

/// GET /ready answers 503 once the store stops responding.
#[tokio::test]
async fn test_ready_is_503_when_the_store_fails() {
    let h = harness().await;
    h.store.set_failing(true);

    let response = h.app().oneshot(get_request("/ready")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

/// GET /metrics renders the Prometheus registry, including counters
/// recorded by the request-tracking middleware.
#[tokio::test]
async fn test_metrics_endpoint_renders_prometheus_text() {
    let h = harness().await;
    h.state.metrics.record_degraded_mode(true);

    let response = h.app().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h.app().oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = read_text(response).await;
    assert!(text.contains("breakwater_degraded_mode_active 1"));
    assert!(text.contains("breakwater_http_requests_total"));
}

/// Unrouted paths are 404 and wrong methods are 405.
#[tokio::test]
async fn test_unknown_routes_and_methods() {
    let h = harness().await;

    let response = h.app().oneshot(get_request("/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h
        .app()
        .oneshot(get_request("/monitoring/start"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
