//! # Operation Queue
//!
//! Durable queue for storage writes that could not run because the
//! dependency was degraded. Operations are persisted through the
//! resilience store, drained in priority order once the dependency
//! allows calls again, and retried with exponential backoff until the
//! retry budget runs out.
//!
//! Execution follows a claim-then-execute protocol: a drainer
//! atomically flips due rows to processing before touching the
//! dependency, and a reaper returns rows claimed by a crashed drainer
//! to pending. An operation is therefore visible to at most one
//! drainer at a time.

use crate::metrics::{OperationOutcome, ResilienceMetrics};
use crate::persistence::{
    NotificationKind, OperationPayload, OperationStatus, QueueStats, QueuedOperation,
    ResilienceStore, StoreError, UserNotification,
};
use crate::{
    AlertSeverity, CorrelationId, DependencyName, OperationId, OperationPriority, Timestamp,
    UserId, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

mod drainer;
mod executor;

pub use drainer::{DrainSummary, QueueDrainer};
pub use executor::{ExecutionError, OperationExecutor, StorageOperationExecutor};

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the queue and its drainer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum live (pending + processing) operations before enqueue
    /// fails with [`QueueError::QueueFull`]
    pub max_queue_size: usize,

    /// Retry budget applied when the caller does not specify one
    pub default_max_retries: u32,

    /// Operations claimed per drain pass
    pub drain_batch_size: usize,

    /// Milliseconds between drain passes
    pub drain_interval_ms: u64,

    /// Milliseconds between reaper passes
    pub reaper_interval_ms: u64,

    /// Base delay for the exponential retry backoff
    pub backoff_base_ms: u64,

    /// Ceiling on the retry backoff delay
    pub max_backoff_ms: u64,

    /// Processing claims older than this are presumed crashed
    pub stuck_claim_timeout_ms: u64,

    /// How long terminal rows are kept before the purge removes them
    pub terminal_retention_ms: u64,
}

impl QueueConfig {
    /// Validate field ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_queue_size == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_queue_size".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.drain_batch_size == 0 {
            return Err(ValidationError::OutOfRange {
                field: "drain_batch_size".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.drain_interval_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "drain_interval_ms".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.reaper_interval_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "reaper_interval_ms".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.backoff_base_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "backoff_base_ms".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.max_backoff_ms < self.backoff_base_ms {
            return Err(ValidationError::OutOfRange {
                field: "max_backoff_ms".to_string(),
                min: self.backoff_base_ms as i64,
                max: i64::MAX,
            });
        }
        if self.stuck_claim_timeout_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "stuck_claim_timeout_ms".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        Ok(())
    }

    /// Backoff delay before the attempt numbered `retry_count`
    ///
    /// Doubles per attempt from the base delay, capped at the
    /// configured ceiling. Always at least one millisecond, so a
    /// rescheduled operation is strictly later than its prior attempt.
    pub fn backoff_delay_ms(&self, retry_count: u32) -> u64 {
        let factor = 2u64.saturating_pow(retry_count);
        self.backoff_base_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms)
            .max(1)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            default_max_retries: 5,
            drain_batch_size: 25,
            drain_interval_ms: 5_000,
            reaper_interval_ms: 60_000,
            backoff_base_ms: 1_000,
            max_backoff_ms: 3_600_000,
            stuck_claim_timeout_ms: 300_000,
            terminal_retention_ms: 7 * 24 * 60 * 60 * 1_000,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// Enqueue rejected because the queue is at capacity
    ///
    /// Backpressure, not an infrastructure failure: nothing was
    /// persisted and the caller must handle the rejection immediately.
    #[error("Queue full: {capacity} live operations already queued")]
    QueueFull { capacity: usize },

    /// Referenced operation does not exist
    #[error("Operation not found: {id}")]
    NotFound { id: OperationId },

    /// Operation already reached a terminal state
    #[error("Operation {id} cannot be cancelled from status {}", .status.as_str())]
    NotCancellable {
        id: OperationId,
        status: OperationStatus,
    },

    /// Store failure on the queue path
    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Check if error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueFull { .. } => false,
            Self::NotFound { .. } => false,
            Self::NotCancellable { .. } => false,
            Self::Store(e) => e.is_transient(),
        }
    }
}

// ============================================================================
// Enqueue Request
// ============================================================================

/// Everything needed to defer one storage operation
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    /// Dependency the operation targets
    pub dependency: DependencyName,

    /// Work to replay once the dependency recovers
    pub payload: OperationPayload,

    /// Drain priority, defaults to [`OperationPriority::NORMAL`]
    pub priority: OperationPriority,

    /// User to notify about the operation's outcome
    pub user_id: Option<UserId>,

    /// Application resource the operation belongs to
    pub resource_id: Option<String>,

    /// Correlation id carried from the failed request
    pub correlation_id: Option<CorrelationId>,

    /// Retry budget override; `None` uses the configured default
    pub max_retries: Option<u32>,
}

impl EnqueueRequest {
    /// Request with default priority and no notification audience
    pub fn new(dependency: DependencyName, payload: OperationPayload) -> Self {
        Self {
            dependency,
            payload,
            priority: OperationPriority::NORMAL,
            user_id: None,
            resource_id: None,
            correlation_id: None,
            max_retries: None,
        }
    }
}

// ============================================================================
// Operation Queue
// ============================================================================

/// Enqueue-side handle over the persisted operation queue
///
/// Cheap to clone via [`Arc`]; the degradation handler and the admin
/// surface share one instance. Draining lives in [`QueueDrainer`].
pub struct OperationQueue {
    config: QueueConfig,
    store: Arc<dyn ResilienceStore>,
    metrics: Arc<dyn ResilienceMetrics>,
}

impl OperationQueue {
    /// Create a queue over the given store
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn ResilienceStore>,
        metrics: Arc<dyn ResilienceMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            metrics,
        }
    }

    /// Get the queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Persist a deferred operation for later replay
    ///
    /// The capacity check happens atomically in the store: a full queue
    /// fails with [`QueueError::QueueFull`] and persists nothing. The
    /// returned id doubles as the replay idempotency key.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<OperationId, QueueError> {
        let max_retries = request
            .max_retries
            .unwrap_or(self.config.default_max_retries);
        let mut operation = QueuedOperation::new(
            request.dependency,
            request.payload,
            request.priority,
            max_retries,
        );
        operation.user_id = request.user_id;
        operation.resource_id = request.resource_id;
        operation.correlation_id = request.correlation_id;

        self.store
            .insert_operation(&operation, self.config.max_queue_size)
            .await
            .map_err(|error| match error {
                StoreError::CapacityExceeded { capacity } => QueueError::QueueFull { capacity },
                other => QueueError::Store(other),
            })?;

        info!(
            operation_id = %operation.id,
            dependency = %operation.dependency,
            kind = operation.kind().as_str(),
            priority = %operation.priority,
            "Operation enqueued for deferred execution"
        );
        self.metrics.record_operation_enqueued(&operation.dependency);
        self.publish_depth().await;

        if let Some(user_id) = &operation.user_id {
            let notification = UserNotification::new(
                user_id.clone(),
                NotificationKind::OperationQueued,
                format!(
                    "Your {} request was queued and will run once {} recovers",
                    operation.kind().as_str(),
                    operation.dependency
                ),
                AlertSeverity::Low,
                serde_json::json!({
                    "operation_id": operation.id.as_str(),
                    "key": operation.payload.key(),
                }),
            );
            if let Err(error) = self.store.insert_notification(&notification).await {
                warn!(
                    operation_id = %operation.id,
                    error = %error,
                    "Failed to record queued-operation notification"
                );
            }
        }

        Ok(operation.id)
    }

    /// Fetch one operation by id
    pub async fn operation(
        &self,
        id: &OperationId,
    ) -> Result<Option<QueuedOperation>, QueueError> {
        Ok(self.store.operation(id).await?)
    }

    /// Cancel a pending or processing operation
    ///
    /// Terminal operations cannot be cancelled; a processing operation
    /// may still finish its in-flight attempt, but will not be retried.
    pub async fn cancel(&self, id: &OperationId) -> Result<QueuedOperation, QueueError> {
        let Some(mut operation) = self.store.operation(id).await? else {
            return Err(QueueError::NotFound { id: *id });
        };

        if !operation.can_cancel() {
            return Err(QueueError::NotCancellable {
                id: *id,
                status: operation.status,
            });
        }

        operation.status = OperationStatus::Cancelled;
        operation.completed_at = Some(Timestamp::now());
        self.store.update_operation(&operation).await?;

        info!(
            operation_id = %operation.id,
            dependency = %operation.dependency,
            "Operation cancelled"
        );
        self.metrics
            .record_operation_outcome(&operation.dependency, OperationOutcome::Cancelled);
        self.publish_depth().await;

        Ok(operation)
    }

    /// Queue depth and per-status counts
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.store.queue_stats().await?)
    }

    /// Refresh the queue depth gauge, ignoring store trouble
    async fn publish_depth(&self) {
        if let Ok(stats) = self.store.queue_stats().await {
            self.metrics
                .record_queue_depth(stats.pending as u64, stats.processing as u64);
        }
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("max_queue_size", &self.config.max_queue_size)
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
