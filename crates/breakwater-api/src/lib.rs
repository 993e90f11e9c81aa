//! # Breakwater HTTP Admin Surface
//!
//! HTTP server exposing the resilience subsystem to operators:
//!
//! - Health overview and on-demand probe batches
//! - Circuit breaker snapshots and administrative resets
//! - Alert listing, manual alerts, and resolution
//! - Monitor configuration and scheduling control
//! - Queue statistics, readiness, and Prometheus metrics

pub mod errors;
pub mod metrics;
pub mod responses;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post, put},
    Router,
};
use breakwater_core::{
    AlertDraft, AlertFilter, AlertId, BreakerRegistry, DependencyName, HealthCheckConfig,
    HealthMonitor, OperationQueue, ResilienceStore, Timestamp, TransitionReason,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument};

pub use errors::{ApiError, ServerError};
pub use metrics::ServiceMetrics;

use responses::{
    AlertListResponse, AlertQuery, BreakerOverviewResponse, BreakerResetResponse, BreakerStateBody,
    DependencyHealth, HealthReport, MonitorConfigBody, MonitoringStateResponse, ProbeBatchEntry,
    ProbeBatchResponse, QueueStatsResponse, RaiseAlertRequest, ReadinessResponse,
    ResetBreakerRequest, ResolveAlertRequest,
};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the server
    pub config: ApiConfig,

    /// Persistence collaborator for status, alerts, and configuration
    pub store: Arc<dyn ResilienceStore>,

    /// Circuit breaker registry
    pub registry: Arc<BreakerRegistry>,

    /// Synthetic health monitor
    pub monitor: Arc<HealthMonitor>,

    /// Durable operation queue
    pub queue: Arc<OperationQueue>,

    /// Prometheus metrics
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn ResilienceStore>,
        registry: Arc<BreakerRegistry>,
        monitor: Arc<HealthMonitor>,
        queue: Arc<OperationQueue>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            monitor,
            queue,
            metrics,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl ApiConfig {
    /// Validate field ranges
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.host.is_empty() {
            return Err(ServerError::Configuration {
                message: "host must not be empty".to_string(),
            });
        }
        if self.shutdown_timeout_seconds == 0 {
            return Err(ServerError::Configuration {
                message: "shutdown_timeout_seconds must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all admin endpoints
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health_overview))
        .route("/health/check", post(run_probe_batch))
        .route("/health/circuit-breaker", get(breaker_overview))
        .route("/health/circuit-breaker/reset", post(reset_breaker))
        .route("/health/alerts", get(list_alerts))
        .route("/health/alerts", post(raise_alert))
        .route("/health/alerts/{alert_id}/resolve", post(resolve_alert))
        .route("/health/config", get(get_monitor_config))
        .route("/health/config", put(put_monitor_config));

    let monitoring_routes = Router::new()
        .route("/monitoring/start", post(start_monitoring))
        .route("/monitoring/stop", post(stop_monitoring));

    let observability_routes = Router::new()
        .route("/queue/stats", get(queue_stats))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint));

    Router::new()
        .merge(health_routes)
        .merge(monitoring_routes)
        .merge(observability_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .with_state(state)
}

/// Start the HTTP server with graceful shutdown on SIGINT/SIGTERM
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    state.config.validate()?;

    let bind_address = format!("{}:{}", state.config.host, state.config.port);
    let shutdown_timeout =
        std::time::Duration::from_secs(state.config.shutdown_timeout_seconds);

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| ServerError::BindFailed {
            address: bind_address.clone(),
            message: e.to_string(),
        })?;

    info!(address = %bind_address, "Starting admin HTTP server");

    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!(
                    timeout_seconds = shutdown_timeout.as_secs(),
                    "Received SIGINT, shutting down"
                );
            },
            _ = terminate => {
                info!(
                    timeout_seconds = shutdown_timeout.as_secs(),
                    "Received SIGTERM, shutting down"
                );
            },
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServerError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("Admin HTTP server shutdown complete");
    Ok(())
}

/// Record request count and latency for every served request
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().as_str().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    state.metrics.observe_http_request(
        &method,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Per-dependency status plus the global read-only flag
///
/// Answers 503 when any tracked dependency is not healthy, with the
/// full report still in the body.
#[instrument(skip(state))]
async fn health_overview(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<HealthReport>), ApiError> {
    let records = state.store.all_service_statuses().await?;
    let read_only = state.store.read_only_mode().await?.is_some();

    let all_healthy = records.iter().all(|record| record.status.is_healthy());
    let dependencies: Vec<DependencyHealth> =
        records.into_iter().map(DependencyHealth::from).collect();

    let report = HealthReport {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        read_only,
        dependencies,
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(report)))
}

/// Run one probe batch immediately and return the batch statuses
#[instrument(skip(state))]
async fn run_probe_batch(
    State(state): State<AppState>,
) -> Result<Json<ProbeBatchResponse>, ApiError> {
    let statuses = state.monitor.run_batch_now().await?;

    let results = statuses
        .into_iter()
        .map(|(dependency, status)| ProbeBatchEntry { dependency, status })
        .collect();
    Ok(Json(ProbeBatchResponse {
        results,
        timestamp: Timestamp::now(),
    }))
}

/// Breaker snapshot per registered dependency
#[instrument(skip(state))]
async fn breaker_overview(
    State(state): State<AppState>,
) -> Result<Json<BreakerOverviewResponse>, ApiError> {
    let breakers = state
        .registry
        .summaries()
        .into_iter()
        .map(BreakerStateBody::from)
        .collect();
    Ok(Json(BreakerOverviewResponse { breakers }))
}

/// Administrative breaker reset back to closed
#[instrument(skip(state, body))]
async fn reset_breaker(
    State(state): State<AppState>,
    Json(body): Json<ResetBreakerRequest>,
) -> Result<Json<BreakerResetResponse>, ApiError> {
    let dependency: DependencyName = body.dependency.parse().map_err(ApiError::Validation)?;

    let breaker = state
        .registry
        .lookup(&dependency)
        .ok_or_else(|| ApiError::NotFound {
            entity: "dependency".to_string(),
            id: dependency.to_string(),
        })?;

    let state_after = breaker.reset(TransitionReason::ManualReset).await?;
    info!(dependency = %dependency, "Circuit breaker reset through the admin API");

    Ok(Json(BreakerResetResponse {
        dependency,
        state: state_after,
        message: "Circuit breaker reset".to_string(),
    }))
}

// ============================================================================
// Alert Handlers
// ============================================================================

/// List alerts, optionally filtered by activity, severity, or dependency
#[instrument(skip(state))]
async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> Result<Json<AlertListResponse>, ApiError> {
    let dependency = query
        .dependency
        .map(|raw| raw.parse::<DependencyName>())
        .transpose()
        .map_err(ApiError::Validation)?;

    let alerts = state
        .store
        .alerts(AlertFilter {
            dependency,
            active_only: query.active_only,
            severity: query.severity,
            limit: query.limit,
        })
        .await?;

    let total = alerts.len();
    Ok(Json(AlertListResponse { alerts, total }))
}

/// Create or re-observe an alert by hand
#[instrument(skip(state, body))]
async fn raise_alert(
    State(state): State<AppState>,
    Json(body): Json<RaiseAlertRequest>,
) -> Result<Json<breakwater_core::ServiceAlert>, ApiError> {
    let dependency: DependencyName = body.dependency.parse().map_err(ApiError::Validation)?;

    let alert = state
        .store
        .upsert_active_alert(AlertDraft {
            dependency,
            alert_type: body.alert_type,
            severity: body.severity,
            message: body.message,
            details: body.details,
        })
        .await?;

    Ok(Json(alert))
}

/// Resolve one alert, recording optional operator notes
#[instrument(skip(state, body))]
async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    Json(body): Json<ResolveAlertRequest>,
) -> Result<Json<breakwater_core::ServiceAlert>, ApiError> {
    let id: AlertId = alert_id.parse().map_err(ApiError::Parse)?;

    let resolved = state
        .store
        .resolve_alert(&id, body.notes)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            entity: "alert".to_string(),
            id: id.to_string(),
        })?;

    Ok(Json(resolved))
}

// ============================================================================
// Configuration Handlers
// ============================================================================

/// Current monitor configuration, defaults when none was stored
#[instrument(skip(state))]
async fn get_monitor_config(
    State(state): State<AppState>,
) -> Result<Json<HealthCheckConfig>, ApiError> {
    let config = state
        .store
        .health_check_config()
        .await?
        .unwrap_or_default();
    Ok(Json(config))
}

/// Replace the monitor configuration
#[instrument(skip(state, body))]
async fn put_monitor_config(
    State(state): State<AppState>,
    Json(body): Json<MonitorConfigBody>,
) -> Result<Json<HealthCheckConfig>, ApiError> {
    let config = body.into_config();
    config.validate().map_err(ApiError::Validation)?;

    state.store.put_health_check_config(&config).await?;
    info!(
        enabled = config.enabled,
        interval_ms = config.interval_ms,
        "Monitor configuration updated"
    );
    Ok(Json(config))
}

// ============================================================================
// Monitoring Control Handlers
// ============================================================================

/// Start the scheduled probe loop
#[instrument(skip(state))]
async fn start_monitoring(State(state): State<AppState>) -> Json<MonitoringStateResponse> {
    let changed = state.monitor.start().await;
    Json(MonitoringStateResponse {
        running: true,
        changed,
    })
}

/// Stop the scheduled probe loop
#[instrument(skip(state))]
async fn stop_monitoring(State(state): State<AppState>) -> Json<MonitoringStateResponse> {
    let changed = state.monitor.stop().await;
    Json(MonitoringStateResponse {
        running: false,
        changed,
    })
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Queue depth and per-status counts
#[instrument(skip(state))]
async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStatsResponse>, ApiError> {
    let stats = state.queue.stats().await?;
    Ok(Json(QueueStatsResponse::from(stats)))
}

/// Readiness check: the store must answer
#[instrument(skip(state))]
async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    match state.store.read_only_mode().await {
        Ok(_) => Ok(Json(ReadinessResponse {
            ready: true,
            timestamp: Timestamp::now(),
        })),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

/// Prometheus metrics in text format
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .render()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
