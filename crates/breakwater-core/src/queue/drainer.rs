//! Scheduled draining, retry backoff, and crash recovery.

use crate::metrics::{OperationOutcome, ResilienceMetrics};
use crate::persistence::{
    NotificationKind, OperationStatus, QueuedOperation, ResilienceStore, UserNotification,
};
use crate::queue::{ExecutionError, OperationExecutor, QueueConfig, QueueError};
use crate::{AlertSeverity, Timestamp};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

// ============================================================================
// Drain Summary
// ============================================================================

/// What one drain pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    /// Operations claimed this pass
    pub claimed: usize,

    /// Operations replayed successfully
    pub completed: usize,

    /// Operations rescheduled with backoff
    pub retried: usize,

    /// Operations that reached terminal failure
    pub failed: usize,
}

// ============================================================================
// Queue Drainer
// ============================================================================

/// Background half of the operation queue
///
/// Runs two loops once started: a drain loop that claims and executes
/// due operations, and a reaper loop that recovers crashed claims and
/// purges terminal rows past retention. Passes never overlap; a tick
/// that lands while a pass is in flight is skipped.
pub struct QueueDrainer {
    worker: DrainWorker,
    runner: Mutex<Option<DrainerRunner>>,
}

/// Handles owned while the background loops run
struct DrainerRunner {
    stop: watch::Sender<bool>,
    drain_handle: JoinHandle<()>,
    reaper_handle: JoinHandle<()>,
}

impl QueueDrainer {
    /// Create a drainer; loops start with [`QueueDrainer::start`]
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn ResilienceStore>,
        executor: Arc<dyn OperationExecutor>,
        metrics: Arc<dyn ResilienceMetrics>,
    ) -> Self {
        Self {
            worker: DrainWorker {
                config,
                store,
                executor,
                metrics,
                pass_lock: Arc::new(Mutex::new(())),
            },
            runner: Mutex::new(None),
        }
    }

    /// Get the drainer configuration
    pub fn config(&self) -> &QueueConfig {
        &self.worker.config
    }

    /// Start the drain and reaper loops
    ///
    /// Returns `false` when the loops are already running.
    pub async fn start(&self) -> bool {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let drain_handle = tokio::spawn(self.worker.clone().drain_loop(stop_rx.clone()));
        let reaper_handle = tokio::spawn(self.worker.clone().reaper_loop(stop_rx));
        *runner = Some(DrainerRunner {
            stop,
            drain_handle,
            reaper_handle,
        });

        info!(
            drain_interval_ms = self.worker.config.drain_interval_ms,
            reaper_interval_ms = self.worker.config.reaper_interval_ms,
            "Queue drainer started"
        );
        true
    }

    /// Stop the loops and wait for in-flight passes to finish
    ///
    /// Returns `false` when the loops were not running.
    pub async fn stop(&self) -> bool {
        let runner = { self.runner.lock().await.take() };
        let Some(runner) = runner else {
            return false;
        };

        let _ = runner.stop.send(true);
        let _ = runner.drain_handle.await;
        let _ = runner.reaper_handle.await;
        info!("Queue drainer stopped");
        true
    }

    /// Check if the loops are running
    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Claim and execute one batch of due operations
    ///
    /// Skips (returning an empty summary) when another pass holds the
    /// overlap guard. Settlement faults on individual operations are
    /// logged and do not abort the pass; the reaper re-exposes any
    /// claim whose settlement was lost.
    pub async fn drain_once(&self) -> Result<DrainSummary, QueueError> {
        self.worker.drain_once().await
    }

    /// Return crashed-drainer claims to pending
    pub async fn reap_stuck(&self) -> Result<usize, QueueError> {
        self.worker.reap_stuck().await
    }

    /// Delete terminal operations past the retention window
    pub async fn purge_terminal(&self) -> Result<usize, QueueError> {
        self.worker.purge_terminal().await
    }
}

impl std::fmt::Debug for QueueDrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDrainer")
            .field("drain_batch_size", &self.worker.config.drain_batch_size)
            .field("drain_interval_ms", &self.worker.config.drain_interval_ms)
            .finish()
    }
}

// ============================================================================
// Drain Worker
// ============================================================================

/// Shared state the background loops and manual passes operate on
///
/// Clones share the overlap guard, so a manual pass and a scheduled
/// tick can never drain concurrently.
#[derive(Clone)]
struct DrainWorker {
    config: QueueConfig,
    store: Arc<dyn ResilienceStore>,
    executor: Arc<dyn OperationExecutor>,
    metrics: Arc<dyn ResilienceMetrics>,
    pass_lock: Arc<Mutex<()>>,
}

impl DrainWorker {
    async fn drain_once(&self) -> Result<DrainSummary, QueueError> {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            debug!("Drain pass already in flight, skipping");
            return Ok(DrainSummary::default());
        };

        let now = Timestamp::now();
        let claimed = self
            .store
            .claim_due_operations(now, self.config.drain_batch_size)
            .await?;

        let mut summary = DrainSummary {
            claimed: claimed.len(),
            ..DrainSummary::default()
        };
        if claimed.is_empty() {
            return Ok(summary);
        }

        for mut operation in claimed {
            match self.executor.execute(&operation).await {
                Ok(()) => {
                    self.settle_completed(&mut operation).await;
                    summary.completed += 1;
                }
                Err(execution_error) => {
                    operation.retry_count += 1;
                    let out_of_budget = operation.retry_count >= operation.max_retries;
                    if execution_error.is_transient() && !out_of_budget {
                        self.settle_retry(&mut operation, &execution_error).await;
                        summary.retried += 1;
                    } else {
                        self.settle_failed(&mut operation, &execution_error, out_of_budget)
                            .await;
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            claimed = summary.claimed,
            completed = summary.completed,
            retried = summary.retried,
            failed = summary.failed,
            "Drain pass finished"
        );
        self.publish_depth().await;
        Ok(summary)
    }

    async fn reap_stuck(&self) -> Result<usize, QueueError> {
        let cutoff = Timestamp::now().sub_millis(self.config.stuck_claim_timeout_ms);
        let requeued = self.store.requeue_stuck_operations(cutoff).await?;
        if !requeued.is_empty() {
            warn!(
                count = requeued.len(),
                "Returned stuck processing operations to pending"
            );
        }
        Ok(requeued.len())
    }

    async fn purge_terminal(&self) -> Result<usize, QueueError> {
        let cutoff = Timestamp::now().sub_millis(self.config.terminal_retention_ms);
        let purged = self.store.purge_terminal_operations(cutoff).await?;
        if purged > 0 {
            info!(purged, "Purged terminal operations past retention");
        }
        Ok(purged)
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    async fn settle_completed(&self, operation: &mut QueuedOperation) {
        operation.status = OperationStatus::Completed;
        operation.completed_at = Some(Timestamp::now());
        operation.error_message = None;
        self.persist(operation).await;

        info!(
            operation_id = %operation.id,
            dependency = %operation.dependency,
            kind = operation.kind().as_str(),
            "Queued operation replayed successfully"
        );
        self.metrics
            .record_operation_outcome(&operation.dependency, OperationOutcome::Completed);
        self.notify_outcome(
            operation,
            NotificationKind::OperationCompleted,
            AlertSeverity::Low,
            format!(
                "Your queued {} request for {} completed",
                operation.kind().as_str(),
                operation.dependency
            ),
        )
        .await;
    }

    async fn settle_retry(&self, operation: &mut QueuedOperation, execution_error: &ExecutionError) {
        let delay_ms = self.config.backoff_delay_ms(operation.retry_count);
        operation.status = OperationStatus::Pending;
        operation.scheduled_at = Timestamp::now().add_millis(delay_ms);
        operation.claimed_at = None;
        operation.error_message = Some(execution_error.to_string());
        self.persist(operation).await;

        warn!(
            operation_id = %operation.id,
            dependency = %operation.dependency,
            retry_count = operation.retry_count,
            max_retries = operation.max_retries,
            delay_ms,
            error = %execution_error,
            "Queued operation failed, rescheduled with backoff"
        );
        self.metrics
            .record_operation_outcome(&operation.dependency, OperationOutcome::Retried);
    }

    async fn settle_failed(
        &self,
        operation: &mut QueuedOperation,
        execution_error: &ExecutionError,
        out_of_budget: bool,
    ) {
        operation.status = OperationStatus::Failed;
        operation.completed_at = Some(Timestamp::now());
        operation.error_message = Some(execution_error.to_string());
        self.persist(operation).await;

        error!(
            operation_id = %operation.id,
            dependency = %operation.dependency,
            retry_count = operation.retry_count,
            out_of_budget,
            error = %execution_error,
            "Queued operation failed terminally"
        );
        self.metrics
            .record_operation_outcome(&operation.dependency, OperationOutcome::Failed);
        let detail = if execution_error.is_transient() {
            format!(
                "Your queued {} request for {} failed after {} attempts",
                operation.kind().as_str(),
                operation.dependency,
                operation.retry_count
            )
        } else {
            format!(
                "Your queued {} request for {} failed and cannot be retried: {}",
                operation.kind().as_str(),
                operation.dependency,
                execution_error
            )
        };
        self.notify_outcome(
            operation,
            NotificationKind::OperationFailed,
            AlertSeverity::High,
            detail,
        )
        .await;
    }

    /// Write the settled row; failure leaves the claim for the reaper
    async fn persist(&self, operation: &QueuedOperation) {
        if let Err(store_error) = self.store.update_operation(operation).await {
            error!(
                operation_id = %operation.id,
                error = %store_error,
                "Failed to persist operation settlement"
            );
        }
    }

    async fn notify_outcome(
        &self,
        operation: &QueuedOperation,
        kind: NotificationKind,
        severity: AlertSeverity,
        message: String,
    ) {
        let Some(user_id) = &operation.user_id else {
            return;
        };
        let notification = UserNotification::new(
            user_id.clone(),
            kind,
            message,
            severity,
            serde_json::json!({
                "operation_id": operation.id.as_str(),
                "dependency": operation.dependency.as_str(),
                "key": operation.payload.key(),
            }),
        );
        if let Err(store_error) = self.store.insert_notification(&notification).await {
            warn!(
                operation_id = %operation.id,
                error = %store_error,
                "Failed to record operation outcome notification"
            );
        }
    }

    async fn publish_depth(&self) {
        if let Ok(stats) = self.store.queue_stats().await {
            self.metrics
                .record_queue_depth(stats.pending as u64, stats.processing as u64);
        }
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    async fn drain_loop(self, mut stop: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.drain_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(queue_error) = self.drain_once().await {
                        warn!(error = %queue_error, "Drain pass failed");
                    }
                }
                _ = stop.changed() => break,
            }
        }
        debug!("Drain loop stopped");
    }

    async fn reaper_loop(self, mut stop: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.reaper_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(queue_error) = self.reap_stuck().await {
                        warn!(error = %queue_error, "Reaper pass failed");
                    }
                    if let Err(queue_error) = self.purge_terminal().await {
                        warn!(error = %queue_error, "Terminal purge failed");
                    }
                }
                _ = stop.changed() => break,
            }
        }
        debug!("Reaper loop stopped");
    }
}

#[cfg(test)]
#[path = "drainer_tests.rs"]
mod tests;
