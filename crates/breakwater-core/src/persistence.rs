//! # Persisted Resilience State
//!
//! Record types for the relational collaborator and the [`ResilienceStore`]
//! trait that abstracts it. The store is the authoritative home of breaker
//! state, health history, alerts, the operation queue, notification
//! intents, and the system event stream; every component consults it so
//! that stateless deployments reach the same decisions.

use crate::circuit_breaker::{BreakerMetrics, CircuitState, TransitionReason};
use crate::health::{HealthStatus, ProbeKind};
use crate::{
    AlertId, CorrelationId, DependencyName, NotificationId, OperationId, OperationPriority,
    Timestamp, Ulid, UserId, ValidationError,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// Service Status
// ============================================================================

/// Operational state of a guarded dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Dependency is serving requests normally
    Healthy,
    /// Dependency is impaired; degraded paths are active
    Degraded,
    /// Dependency is unreachable
    Offline,
}

impl ServiceStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }

    /// Check if the dependency is fully operational
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// One row per dependency in the `service_status` table
///
/// Created at bootstrap and updated in place. The circuit fields are
/// written through by the breaker on every guarded call, which makes this
/// row the cross-invocation source of truth for breaker decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatusRecord {
    /// Dependency this row describes (unique)
    pub dependency: DependencyName,

    /// Current operational state
    pub status: ServiceStatus,

    /// Consecutive failures observed by the breaker
    pub failure_count: u32,

    /// Current circuit state
    pub circuit_state: CircuitState,

    /// When the circuit last opened, if it is not closed
    pub circuit_opened_at: Option<Timestamp>,

    /// Why the dependency was marked degraded, when it is
    pub degradation_reason: Option<String>,

    /// Rolling health aggregates snapshot (JSON)
    pub health_metrics: serde_json::Value,

    /// Last time any field changed
    pub updated_at: Timestamp,
}

impl ServiceStatusRecord {
    /// Create the bootstrap row for a healthy dependency
    pub fn healthy(dependency: DependencyName) -> Self {
        Self {
            dependency,
            status: ServiceStatus::Healthy,
            failure_count: 0,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
            degradation_reason: None,
            health_metrics: serde_json::Value::Null,
            updated_at: Timestamp::now(),
        }
    }
}

/// Breaker-owned fields written through to the status row
///
/// A patch rather than a full record so breaker write-through never
/// stomps the `status`/`degradation_reason` fields owned by the
/// degradation handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Current circuit state
    pub circuit_state: CircuitState,

    /// When the circuit opened, `None` once closed
    pub circuit_opened_at: Option<Timestamp>,

    /// Consecutive failure count
    pub failure_count: u32,

    /// Metrics snapshot serialized for the `health_metrics` column
    pub metrics: BreakerMetrics,
}

/// Global read-only flag persisted alongside the status rows
///
/// `None` in the store means writes are allowed. The flag is only lifted
/// when every tracked dependency is healthy again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOnlyMode {
    /// When read-only mode was entered
    pub entered_at: Timestamp,

    /// Human-readable cause
    pub reason: String,

    /// Dependency whose degradation triggered the mode
    pub triggered_by: DependencyName,
}

// ============================================================================
// Circuit Breaker Events
// ============================================================================

/// Append-only record of a circuit state transition
///
/// Written for every transition; failures to append are logged and never
/// mask the guarded call's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerEvent {
    /// Unique event id (ULID, time-ordered)
    pub id: Ulid,

    /// Dependency whose breaker transitioned
    pub dependency: DependencyName,

    /// When the transition happened
    pub occurred_at: Timestamp,

    /// State before the transition
    pub prior_state: CircuitState,

    /// State after the transition
    pub new_state: CircuitState,

    /// What caused the transition
    pub reason: TransitionReason,

    /// Breaker metrics at the moment of transition
    pub metrics: BreakerMetrics,
}

impl BreakerEvent {
    /// Create a transition event stamped with the current time
    pub fn new(
        dependency: DependencyName,
        prior_state: CircuitState,
        new_state: CircuitState,
        reason: TransitionReason,
        metrics: BreakerMetrics,
    ) -> Self {
        Self {
            id: Ulid::new(),
            dependency,
            occurred_at: Timestamp::now(),
            prior_state,
            new_state,
            reason,
            metrics,
        }
    }
}

// ============================================================================
// Health History
// ============================================================================

/// Append-only record of one synthetic probe execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Unique result id (ULID, time-ordered)
    pub id: Ulid,

    /// Dependency that was probed
    pub dependency: DependencyName,

    /// Which probe ran
    pub probe: ProbeKind,

    /// Classified outcome
    pub status: HealthStatus,

    /// Observed latency in milliseconds
    pub response_time_ms: u64,

    /// Error detail for degraded/unhealthy results
    pub error_message: Option<String>,

    /// When the probe ran
    pub checked_at: Timestamp,
}

impl HealthCheckResult {
    /// Create a probe result stamped with the current time
    pub fn record(
        dependency: DependencyName,
        probe: ProbeKind,
        status: HealthStatus,
        response_time_ms: u64,
        error_message: Option<String>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            dependency,
            probe,
            status,
            response_time_ms,
            error_message,
            checked_at: Timestamp::now(),
        }
    }
}

/// Monitor configuration stored in the `health_check_config` table
///
/// Reloaded at the start of every probe batch, so `PUT /health/config`
/// takes effect on the next tick without a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Whether scheduled probing is enabled
    pub enabled: bool,

    /// Milliseconds between probe batches
    pub interval_ms: u64,

    /// Deadline for a single probe
    pub probe_timeout_ms: u64,

    /// Latency at or above which a successful probe counts as degraded
    pub slow_threshold_ms: u64,

    /// Probes to run each batch, in order
    pub probes: Vec<ProbeKind>,

    /// Number of recent results aggregated per dependency
    pub window_size: usize,

    /// Last time the configuration changed
    pub updated_at: Timestamp,
}

impl HealthCheckConfig {
    /// Validate field ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_ms < 1_000 {
            return Err(ValidationError::OutOfRange {
                field: "interval_ms".to_string(),
                min: 1_000,
                max: i64::MAX,
            });
        }

        if self.probe_timeout_ms < 100 {
            return Err(ValidationError::OutOfRange {
                field: "probe_timeout_ms".to_string(),
                min: 100,
                max: i64::MAX,
            });
        }

        if self.slow_threshold_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "slow_threshold_ms".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }

        if self.probes.is_empty() {
            return Err(ValidationError::Required {
                field: "probes".to_string(),
            });
        }

        if !(1..=1_000).contains(&self.window_size) {
            return Err(ValidationError::OutOfRange {
                field: "window_size".to_string(),
                min: 1,
                max: 1_000,
            });
        }

        Ok(())
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            slow_threshold_ms: 2_000,
            probes: vec![
                ProbeKind::Write,
                ProbeKind::Read,
                ProbeKind::Metadata,
                ProbeKind::List,
                ProbeKind::Delete,
            ],
            window_size: 50,
            updated_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Category of a service alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// A dependency's circuit breaker is open
    CircuitOpen,
    /// Rolling error rate crossed the alerting threshold
    HighErrorRate,
    /// Rolling average latency crossed the slow threshold
    SlowResponse,
    /// A probe batch observed the dependency unhealthy
    ServiceDegraded,
    /// The dependency returned to healthy after a degradation episode
    ServiceRecovered,
}

impl AlertType {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::HighErrorRate => "high_error_rate",
            Self::SlowResponse => "slow_response",
            Self::ServiceDegraded => "service_degraded",
            Self::ServiceRecovered => "service_recovered",
        }
    }
}

/// Alert severity scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One row in the `service_alerts` table
///
/// Deduplication is upsert-while-unresolved: a new evaluation matching an
/// unresolved (dependency, alert_type) pair bumps `occurrence_count` and
/// `last_observed_at` instead of inserting another row. A resolved alert
/// never absorbs new occurrences; the next episode starts a fresh row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAlert {
    /// Unique alert id
    pub id: AlertId,

    /// Dependency the alert concerns
    pub dependency: DependencyName,

    /// Alert category
    pub alert_type: AlertType,

    /// Severity at last observation
    pub severity: AlertSeverity,

    /// Human-readable summary
    pub message: String,

    /// Structured context (JSON)
    pub details: serde_json::Value,

    /// How many evaluations matched this row while unresolved
    pub occurrence_count: u64,

    /// When the alert was first raised
    pub created_at: Timestamp,

    /// When the condition was last observed
    pub last_observed_at: Timestamp,

    /// When the alert was resolved, if it has been
    pub resolved_at: Option<Timestamp>,

    /// Operator or system notes recorded at resolution
    pub resolution_notes: Option<String>,
}

impl ServiceAlert {
    /// Check if the alert is still unresolved
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Input for raising (or re-observing) an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    /// Dependency the alert concerns
    pub dependency: DependencyName,

    /// Alert category
    pub alert_type: AlertType,

    /// Severity of this observation
    pub severity: AlertSeverity,

    /// Human-readable summary
    pub message: String,

    /// Structured context (JSON)
    pub details: serde_json::Value,
}

/// Filter criteria for listing alerts
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// Restrict to one dependency
    pub dependency: Option<DependencyName>,

    /// Only unresolved alerts
    pub active_only: bool,

    /// Restrict to one severity
    pub severity: Option<AlertSeverity>,

    /// Maximum number of results, newest first
    pub limit: Option<usize>,
}

// ============================================================================
// Operation Queue
// ============================================================================

/// Lifecycle state of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be claimed once `scheduled_at` is due
    Pending,
    /// Claimed by a drainer and executing
    Processing,
    /// Replayed successfully
    Completed,
    /// Exhausted retries or failed permanently
    Failed,
    /// Cancelled by an administrative action
    Cancelled,
}

impl OperationStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if the operation will never execute again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Kind discriminator for queued operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    StoreObject,
    DeleteObject,
    UpdateMetadata,
}

impl OperationKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreObject => "store_object",
            Self::DeleteObject => "delete_object",
            Self::UpdateMetadata => "update_metadata",
        }
    }
}

/// Typed payload of a deferred storage operation
///
/// A tagged union: the discriminator and the fields it implies are
/// validated together at enqueue time, so a malformed payload can never
/// reach the drainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationPayload {
    /// Store an object once the dependency recovers
    StoreObject {
        key: String,
        content_type: Option<String>,
        #[serde(with = "crate::object_store::bytes_serde")]
        data: Bytes,
    },

    /// Delete an object once the dependency recovers
    DeleteObject { key: String },

    /// Replace an object's user metadata once the dependency recovers
    UpdateMetadata {
        key: String,
        metadata: HashMap<String, String>,
    },
}

impl OperationPayload {
    /// Get the kind discriminator
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::StoreObject { .. } => OperationKind::StoreObject,
            Self::DeleteObject { .. } => OperationKind::DeleteObject,
            Self::UpdateMetadata { .. } => OperationKind::UpdateMetadata,
        }
    }

    /// Get the object key the payload targets
    pub fn key(&self) -> &str {
        match self {
            Self::StoreObject { key, .. } => key,
            Self::DeleteObject { key } => key,
            Self::UpdateMetadata { key, .. } => key,
        }
    }
}

/// One row in the `operation_queue` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique operation id; doubles as the replay idempotency key
    pub id: OperationId,

    /// Dependency the operation targets
    pub dependency: DependencyName,

    /// Deferred work to replay
    pub payload: OperationPayload,

    /// Drain priority (1 first, ties break on `created_at`)
    pub priority: OperationPriority,

    /// User to notify about the operation's outcome, when known
    pub user_id: Option<UserId>,

    /// Application resource the operation belongs to, for tracing
    pub resource_id: Option<String>,

    /// Correlation id carried from the failed request, when known
    pub correlation_id: Option<CorrelationId>,

    /// Lifecycle state
    pub status: OperationStatus,

    /// Failed attempts so far
    pub retry_count: u32,

    /// Attempt budget before the operation is marked failed
    pub max_retries: u32,

    /// Error from the most recent attempt
    pub error_message: Option<String>,

    /// When the operation was enqueued
    pub created_at: Timestamp,

    /// Earliest time the operation may be claimed
    pub scheduled_at: Timestamp,

    /// When a drainer claimed the operation, while processing
    pub claimed_at: Option<Timestamp>,

    /// When the operation reached a terminal state
    pub completed_at: Option<Timestamp>,
}

impl QueuedOperation {
    /// Create a pending operation scheduled for immediate drain
    pub fn new(
        dependency: DependencyName,
        payload: OperationPayload,
        priority: OperationPriority,
        max_retries: u32,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: OperationId::new(),
            dependency,
            payload,
            priority,
            user_id: None,
            resource_id: None,
            correlation_id: None,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries,
            error_message: None,
            created_at: now,
            scheduled_at: now,
            claimed_at: None,
            completed_at: None,
        }
    }

    /// Get the payload kind discriminator
    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    /// Check if the operation can still be cancelled
    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status,
            OperationStatus::Pending | OperationStatus::Processing
        )
    }
}

/// Queue depth and per-status counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    /// Operations still waiting for (or in) execution
    pub fn depth(&self) -> usize {
        self.pending + self.processing
    }
}

// ============================================================================
// Notifications and System Events
// ============================================================================

/// Category of a recorded notification intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ServiceDegraded,
    ServiceRecovered,
    OperationQueued,
    OperationCompleted,
    OperationFailed,
}

impl NotificationKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceDegraded => "service_degraded",
            Self::ServiceRecovered => "service_recovered",
            Self::OperationQueued => "operation_queued",
            Self::OperationCompleted => "operation_completed",
            Self::OperationFailed => "operation_failed",
        }
    }
}

/// One row in the `user_notifications` table
///
/// Breakwater records the intent; delivery belongs to another system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotification {
    /// Unique notification id
    pub id: NotificationId,

    /// User the notification is addressed to
    pub user_id: UserId,

    /// Notification category
    pub kind: NotificationKind,

    /// Human-readable message
    pub message: String,

    /// Severity mirrored from the triggering condition
    pub severity: AlertSeverity,

    /// Structured context (JSON)
    pub metadata: serde_json::Value,

    /// When the intent was recorded
    pub created_at: Timestamp,

    /// When the user acknowledged it, if delivery reported back
    pub acknowledged_at: Option<Timestamp>,
}

impl UserNotification {
    /// Create a notification intent stamped with the current time
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        message: impl Into<String>,
        severity: AlertSeverity,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            kind,
            message: message.into(),
            severity,
            metadata,
            created_at: Timestamp::now(),
            acknowledged_at: None,
        }
    }
}

/// Append-only audit record in the `system_events` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Unique event id (ULID, time-ordered)
    pub id: Ulid,

    /// Dotted event type, for example `degradation.entered`
    pub event_type: String,

    /// Dependency the event concerns, when applicable
    pub dependency: Option<DependencyName>,

    /// Correlation id carried from the triggering request, when known
    pub correlation_id: Option<CorrelationId>,

    /// Structured event payload (JSON)
    pub payload: serde_json::Value,

    /// When the event occurred
    pub occurred_at: Timestamp,
}

impl SystemEvent {
    /// Create an event stamped with the current time
    pub fn new(
        event_type: impl Into<String>,
        dependency: Option<DependencyName>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Ulid::new(),
            event_type: event_type.into(),
            dependency,
            correlation_id: None,
            payload,
            occurred_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Errors that can occur against the relational collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    /// Insert rejected because the bounded table is full
    #[error("Capacity exceeded: limit {capacity}")]
    CapacityExceeded { capacity: usize },

    /// Referenced row does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Row failed to serialize or deserialize
    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    /// Concurrent update conflicted
    #[error("Conflicting update: {message}")]
    Conflict { message: String },

    /// Underlying storage failure
    #[error("Store I/O error: {message}")]
    Io { message: String },
}

impl StoreError {
    /// Check if error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Conflict { .. })
    }
}

/// Relational persistence collaborator for all resilience state
///
/// Implementations must make `insert_operation` capacity checks and
/// `claim_due_operations` status flips atomic; the claim-then-execute
/// protocol depends on a claimed row being invisible to other drainers.
#[async_trait]
pub trait ResilienceStore: Send + Sync {
    // ---- service status -------------------------------------------------

    /// Insert the bootstrap row for a dependency if none exists
    async fn init_service_status(&self, record: ServiceStatusRecord) -> Result<(), StoreError>;

    /// Fetch one dependency's status row
    async fn service_status(
        &self,
        dependency: &DependencyName,
    ) -> Result<Option<ServiceStatusRecord>, StoreError>;

    /// Fetch every tracked dependency's status row
    async fn all_service_statuses(&self) -> Result<Vec<ServiceStatusRecord>, StoreError>;

    /// Replace a dependency's status row
    async fn update_service_status(&self, record: &ServiceStatusRecord) -> Result<(), StoreError>;

    /// Patch only the breaker-owned fields of a status row
    async fn record_breaker_snapshot(
        &self,
        dependency: &DependencyName,
        snapshot: BreakerSnapshot,
    ) -> Result<(), StoreError>;

    // ---- read-only flag -------------------------------------------------

    /// Read the global read-only flag, `None` when writes are allowed
    async fn read_only_mode(&self) -> Result<Option<ReadOnlyMode>, StoreError>;

    /// Set or clear the global read-only flag
    async fn set_read_only_mode(&self, mode: Option<ReadOnlyMode>) -> Result<(), StoreError>;

    // ---- circuit breaker events -----------------------------------------

    /// Append a breaker transition event
    async fn append_breaker_event(&self, event: &BreakerEvent) -> Result<(), StoreError>;

    /// Fetch recent breaker events for a dependency, newest first
    async fn breaker_events(
        &self,
        dependency: &DependencyName,
        limit: usize,
    ) -> Result<Vec<BreakerEvent>, StoreError>;

    // ---- health history -------------------------------------------------

    /// Append a probe result
    async fn append_health_result(&self, result: &HealthCheckResult) -> Result<(), StoreError>;

    /// Fetch recent probe results for a dependency, newest first
    async fn recent_health_results(
        &self,
        dependency: &DependencyName,
        limit: usize,
    ) -> Result<Vec<HealthCheckResult>, StoreError>;

    /// Read the stored monitor configuration
    async fn health_check_config(&self) -> Result<Option<HealthCheckConfig>, StoreError>;

    /// Replace the stored monitor configuration
    async fn put_health_check_config(&self, config: &HealthCheckConfig) -> Result<(), StoreError>;

    // ---- alerts ---------------------------------------------------------

    /// Raise an alert, or bump the matching unresolved one
    ///
    /// Returns the row that now represents the condition.
    async fn upsert_active_alert(&self, draft: AlertDraft) -> Result<ServiceAlert, StoreError>;

    /// List alerts matching the filter, newest first
    async fn alerts(&self, filter: AlertFilter) -> Result<Vec<ServiceAlert>, StoreError>;

    /// Resolve one alert; `None` when the id is unknown
    async fn resolve_alert(
        &self,
        id: &AlertId,
        notes: Option<String>,
    ) -> Result<Option<ServiceAlert>, StoreError>;

    /// Resolve every active alert for a dependency, returning the count
    async fn resolve_alerts_for_dependency(
        &self,
        dependency: &DependencyName,
        notes: &str,
    ) -> Result<usize, StoreError>;

    // ---- operation queue ------------------------------------------------

    /// Insert a pending operation, enforcing the queue capacity atomically
    ///
    /// Capacity counts non-terminal rows. A full queue fails with
    /// [`StoreError::CapacityExceeded`] and persists nothing.
    async fn insert_operation(
        &self,
        operation: &QueuedOperation,
        capacity: usize,
    ) -> Result<(), StoreError>;

    /// Fetch one operation by id
    async fn operation(&self, id: &OperationId) -> Result<Option<QueuedOperation>, StoreError>;

    /// Replace an operation row
    async fn update_operation(&self, operation: &QueuedOperation) -> Result<(), StoreError>;

    /// Atomically claim due pending operations for execution
    ///
    /// Orders by (priority ascending, created_at ascending), takes rows
    /// whose `scheduled_at` is not after `now`, marks them processing
    /// with `claimed_at = now`, and returns the claimed rows.
    async fn claim_due_operations(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<QueuedOperation>, StoreError>;

    /// Return crashed-drainer claims to pending
    ///
    /// Any processing row claimed before `claimed_before` goes back to
    /// pending; returns the affected ids.
    async fn requeue_stuck_operations(
        &self,
        claimed_before: Timestamp,
    ) -> Result<Vec<OperationId>, StoreError>;

    /// Delete terminal rows older than the retention cutoff
    async fn purge_terminal_operations(
        &self,
        completed_before: Timestamp,
    ) -> Result<usize, StoreError>;

    /// Count operations per lifecycle state
    async fn queue_stats(&self) -> Result<QueueStats, StoreError>;

    // ---- notifications --------------------------------------------------

    /// Record a notification intent
    async fn insert_notification(&self, notification: &UserNotification)
        -> Result<(), StoreError>;

    /// Fetch recent notification intents for a user, newest first
    async fn notifications_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<UserNotification>, StoreError>;

    // ---- system events --------------------------------------------------

    /// Append an audit event
    async fn append_system_event(&self, event: &SystemEvent) -> Result<(), StoreError>;

    /// Fetch recent audit events, newest first
    async fn recent_system_events(&self, limit: usize) -> Result<Vec<SystemEvent>, StoreError>;
}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
