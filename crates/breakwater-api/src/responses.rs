//! Response types, request bodies, and query parameters for the admin API.

use breakwater_core::{
    AlertSeverity, AlertType, CircuitState, CircuitSummary, DependencyName, HealthCheckConfig,
    HealthStatus, QueueStats, ServiceAlert, ServiceStatus, ServiceStatusRecord, Timestamp,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Response Types
// ============================================================================

/// Overall health report for the subsystem
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub read_only: bool,
    pub dependencies: Vec<DependencyHealth>,
    pub timestamp: Timestamp,
    pub version: String,
}

/// Health summary for one tracked dependency
#[derive(Debug, Serialize)]
pub struct DependencyHealth {
    pub dependency: DependencyName,
    pub status: ServiceStatus,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub degradation_reason: Option<String>,
    pub updated_at: Timestamp,
}

impl From<ServiceStatusRecord> for DependencyHealth {
    fn from(record: ServiceStatusRecord) -> Self {
        Self {
            dependency: record.dependency,
            status: record.status,
            circuit_state: record.circuit_state,
            failure_count: record.failure_count,
            degradation_reason: record.degradation_reason,
            updated_at: record.updated_at,
        }
    }
}

/// Outcome of an on-demand probe batch
#[derive(Debug, Serialize)]
pub struct ProbeBatchResponse {
    pub results: Vec<ProbeBatchEntry>,
    pub timestamp: Timestamp,
}

/// Batch-level status for one dependency
#[derive(Debug, Serialize)]
pub struct ProbeBatchEntry {
    pub dependency: DependencyName,
    pub status: HealthStatus,
}

/// Breaker snapshot across all registered dependencies
#[derive(Debug, Serialize)]
pub struct BreakerOverviewResponse {
    pub breakers: Vec<BreakerStateBody>,
}

/// Snapshot of one dependency's circuit breaker
#[derive(Debug, Serialize)]
pub struct BreakerStateBody {
    pub dependency: DependencyName,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,
    pub rejected_calls: u64,
    pub consecutive_failures: u32,
    pub average_response_time_ms: f64,
    pub failure_rate: f64,
}

impl From<CircuitSummary> for BreakerStateBody {
    fn from(summary: CircuitSummary) -> Self {
        let failure_rate = summary.metrics.failure_rate();
        Self {
            dependency: summary.dependency,
            state: summary.state,
            failure_threshold: summary.failure_threshold,
            recovery_timeout_ms: summary.recovery_timeout_ms,
            total_calls: summary.metrics.total_calls,
            successful_calls: summary.metrics.successful_calls,
            failed_calls: summary.metrics.failed_calls,
            slow_calls: summary.metrics.slow_calls,
            rejected_calls: summary.metrics.rejected_calls,
            consecutive_failures: summary.metrics.consecutive_failures,
            average_response_time_ms: summary.metrics.average_response_time_ms,
            failure_rate,
        }
    }
}

/// Result of an administrative breaker reset
#[derive(Debug, Serialize)]
pub struct BreakerResetResponse {
    pub dependency: DependencyName,
    pub state: CircuitState,
    pub message: String,
}

/// Alert listing with the applied filter's match count
#[derive(Debug, Serialize)]
pub struct AlertListResponse {
    pub alerts: Vec<ServiceAlert>,
    pub total: usize,
}

/// Monitor scheduling state after a start or stop request
#[derive(Debug, Serialize)]
pub struct MonitoringStateResponse {
    pub running: bool,
    pub changed: bool,
}

/// Queue depth and per-status counts
#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub depth: usize,
}

impl From<QueueStats> for QueueStatsResponse {
    fn from(stats: QueueStats) -> Self {
        Self {
            pending: stats.pending,
            processing: stats.processing,
            completed: stats.completed,
            failed: stats.failed,
            cancelled: stats.cancelled,
            depth: stats.depth(),
        }
    }
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
}

// ============================================================================
// Request Bodies and Query Parameters
// ============================================================================

/// Body for `POST /health/circuit-breaker/reset`
#[derive(Debug, Deserialize)]
pub struct ResetBreakerRequest {
    pub dependency: String,
}

/// Body for `POST /health/alerts`
#[derive(Debug, Deserialize)]
pub struct RaiseAlertRequest {
    pub dependency: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Body for `POST /health/alerts/{id}/resolve`
#[derive(Debug, Default, Deserialize)]
pub struct ResolveAlertRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

/// Query parameters for `GET /health/alerts`
#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    #[serde(default)]
    pub active_only: bool,
    pub severity: Option<AlertSeverity>,
    pub dependency: Option<String>,
    pub limit: Option<usize>,
}

/// Body for `PUT /health/config`
///
/// Missing fields fall back to the built-in defaults; `updated_at` is
/// always stamped server-side.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfigBody {
    pub enabled: bool,
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub slow_threshold_ms: u64,
    pub probes: Vec<breakwater_core::ProbeKind>,
    pub window_size: usize,
}

impl Default for MonitorConfigBody {
    fn default() -> Self {
        let config = HealthCheckConfig::default();
        Self {
            enabled: config.enabled,
            interval_ms: config.interval_ms,
            probe_timeout_ms: config.probe_timeout_ms,
            slow_threshold_ms: config.slow_threshold_ms,
            probes: config.probes,
            window_size: config.window_size,
        }
    }
}

impl MonitorConfigBody {
    /// Build the persisted configuration, stamping the update time
    pub fn into_config(self) -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: self.enabled,
            interval_ms: self.interval_ms,
            probe_timeout_ms: self.probe_timeout_ms,
            slow_threshold_ms: self.slow_threshold_ms,
            probes: self.probes,
            window_size: self.window_size,
            updated_at: Timestamp::now(),
        }
    }
}
