//! Coordinated failover and global degraded mode.
//!
//! The handler sits between request handling and the object stores. Every
//! guarded call runs a three-step decision: the global read-only gate for
//! writes, the persisted circuit state, and only then the primary path
//! through the dependency's breaker. Expected degraded conditions come
//! back as an `Ok(FailoverOutcome)` so callers can branch on them;
//! `Err` is reserved for infrastructure failures on the decision path
//! itself.
//!
//! Entering degraded mode force-opens the breaker and may set a global
//! read-only flag. The flag is lifted all-or-nothing: only when every
//! tracked dependency reports healthy again.

use crate::circuit_breaker::{BreakerRegistry, CircuitBreakerError, CircuitState, TransitionReason};
use crate::metrics::ResilienceMetrics;
use crate::object_store::ObjectStoreError;
use crate::persistence::{
    AlertDraft, AlertSeverity, AlertType, NotificationKind, OperationPayload, ReadOnlyMode,
    ResilienceStore, ServiceStatus, StoreError, SystemEvent, UserNotification,
};
use crate::queue::{EnqueueRequest, OperationQueue};
use crate::{
    BreakwaterError, CorrelationId, DependencyName, OperationId, OperationPriority, Timestamp,
    UserId,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Failover Request and Outcome
// ============================================================================

/// Context for one failover-guarded call
///
/// The `write` classification feeds the read-only gate; reads pass the
/// gate untouched. A deferred payload opts the call into queueing when
/// the primary path cannot run.
#[derive(Debug, Clone)]
pub struct FailoverRequest {
    /// Dependency the call targets
    pub dependency: DependencyName,

    /// Short name of the operation, for logs and events
    pub operation: String,

    /// Whether the call mutates the dependency
    pub write: bool,

    /// User to notify if the call is deferred to the queue
    pub user_id: Option<UserId>,

    /// Correlation id carried from the surrounding request
    pub correlation_id: Option<CorrelationId>,

    /// Payload to enqueue when the call cannot run now
    pub deferred: Option<DeferredOperation>,
}

impl FailoverRequest {
    /// Request for a read operation
    pub fn read(dependency: DependencyName, operation: impl Into<String>) -> Self {
        Self {
            dependency,
            operation: operation.into(),
            write: false,
            user_id: None,
            correlation_id: None,
            deferred: None,
        }
    }

    /// Request for a write operation
    pub fn write(dependency: DependencyName, operation: impl Into<String>) -> Self {
        Self {
            write: true,
            ..Self::read(dependency, operation)
        }
    }

    /// Opt into queueing when the call cannot run now
    pub fn with_deferred(mut self, deferred: DeferredOperation) -> Self {
        self.deferred = Some(deferred);
        self
    }

    /// Attach the user to notify about a deferred outcome
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Attach a correlation id for tracing
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Work to queue when the primary path cannot run
#[derive(Debug, Clone)]
pub struct DeferredOperation {
    /// Payload to replay once the dependency recovers
    pub payload: OperationPayload,

    /// Drain priority for the queued operation
    pub priority: OperationPriority,

    /// Application resource the operation belongs to
    pub resource_id: Option<String>,

    /// Retry budget override
    pub max_retries: Option<u32>,
}

impl DeferredOperation {
    /// Deferred payload with default priority and retry budget
    pub fn new(payload: OperationPayload) -> Self {
        Self {
            payload,
            priority: OperationPriority::NORMAL,
            resource_id: None,
            max_retries: None,
        }
    }

    /// Override the drain priority
    pub fn with_priority(mut self, priority: OperationPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// How a failover-guarded call concluded
///
/// `success` means data was produced, by the primary or the fallback;
/// `degraded` means the primary path did not complete normally. A queued
/// id means the work was accepted for replay even though it did not run.
#[derive(Debug)]
pub struct FailoverOutcome<T> {
    /// Whether the call produced data
    pub success: bool,

    /// Whether the call ran outside the normal primary path
    pub degraded: bool,

    /// Operation queued for later replay, when the caller opted in
    pub queued: Option<OperationId>,

    /// Data produced by the primary or fallback
    pub data: Option<T>,

    /// Why no data was produced
    pub failure: Option<FailoverFailure>,
}

impl<T> FailoverOutcome<T> {
    fn completed(data: T) -> Self {
        Self {
            success: true,
            degraded: false,
            queued: None,
            data: Some(data),
            failure: None,
        }
    }

    fn fallback_success(data: T) -> Self {
        Self {
            degraded: true,
            ..Self::completed(data)
        }
    }

    fn rejected(failure: FailoverFailure, queued: Option<OperationId>) -> Self {
        Self {
            success: false,
            degraded: true,
            queued,
            data: None,
            failure: Some(failure),
        }
    }

    /// Check if the work was deferred to the queue
    pub fn was_queued(&self) -> bool {
        self.queued.is_some()
    }
}

/// Why a failover-guarded call produced no data
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailoverFailure {
    /// The call was a write and global read-only mode is active
    #[error("Writes are paused while {dependency} recovers: {reason}")]
    ReadOnly {
        dependency: DependencyName,
        reason: String,
    },

    /// The dependency's circuit is open; the call was never attempted
    #[error("Dependency {dependency} is unavailable: circuit open")]
    CircuitOpen { dependency: DependencyName },

    /// The call ran and failed, and no fallback produced data
    #[error("Operation {operation} against {dependency} failed: {message}")]
    Operation {
        dependency: DependencyName,
        operation: String,
        message: String,
    },
}

/// Escalations applied when entering degraded mode
#[derive(Debug, Clone, Default)]
pub struct DegradedOptions {
    /// Mark the dependency offline rather than degraded
    pub offline: bool,

    /// Enter global read-only mode until every dependency recovers
    pub read_only: bool,

    /// Users to record degradation and recovery notifications for
    pub notify: Vec<UserId>,
}

// Lets the no-fallback entry point name a concrete closure type.
type NoFallback<T> = fn() -> std::future::Ready<Result<T, ObjectStoreError>>;

// ============================================================================
// Degradation Handler
// ============================================================================

/// Runs guarded calls with failover and owns the degraded-mode lifecycle
///
/// One handler serves all dependencies; per-dependency isolation comes
/// from the breaker registry underneath it.
pub struct DegradationHandler {
    store: Arc<dyn ResilienceStore>,
    registry: Arc<BreakerRegistry>,
    queue: Arc<OperationQueue>,
    metrics: Arc<dyn ResilienceMetrics>,
    /// Notification audience captured at degradation entry, consumed at exit
    episode_audience: RwLock<HashMap<DependencyName, Vec<UserId>>>,
}

impl DegradationHandler {
    /// Create a handler over the shared collaborators
    pub fn new(
        store: Arc<dyn ResilienceStore>,
        registry: Arc<BreakerRegistry>,
        queue: Arc<OperationQueue>,
        metrics: Arc<dyn ResilienceMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            metrics,
            episode_audience: RwLock::new(HashMap::new()),
        }
    }

    /// Run a guarded call with no fallback path
    pub async fn execute_with_failover<T, P, PF>(
        &self,
        request: FailoverRequest,
        primary: P,
    ) -> Result<FailoverOutcome<T>, BreakwaterError>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, ObjectStoreError>>,
    {
        self.run_failover(request, primary, None::<NoFallback<T>>)
            .await
    }

    /// Run a guarded call, falling back to a secondary path on failure
    pub async fn execute_with_fallback<T, P, PF, B, BF>(
        &self,
        request: FailoverRequest,
        primary: P,
        fallback: B,
    ) -> Result<FailoverOutcome<T>, BreakwaterError>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, ObjectStoreError>>,
        B: FnOnce() -> BF,
        BF: Future<Output = Result<T, ObjectStoreError>>,
    {
        self.run_failover(request, primary, Some(fallback)).await
    }

    async fn run_failover<T, P, PF, B, BF>(
        &self,
        request: FailoverRequest,
        primary: P,
        fallback: Option<B>,
    ) -> Result<FailoverOutcome<T>, BreakwaterError>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, ObjectStoreError>>,
        B: FnOnce() -> BF,
        BF: Future<Output = Result<T, ObjectStoreError>>,
    {
        // Step 1: the global read-only gate applies to writes only.
        if request.write {
            if let Some(mode) = self.store.read_only_mode().await? {
                return self.reject_read_only(request, mode).await;
            }
        }

        // Step 2: the persisted row is the cross-process view of the
        // circuit. Holding open means skip the primary without waking
        // the in-memory breaker.
        if self.circuit_holding_open(&request.dependency).await? {
            debug!(
                dependency = %request.dependency,
                operation = %request.operation,
                "Skipping primary: persisted circuit state is open"
            );
            if let Some(fallback) = fallback {
                match fallback().await {
                    Ok(data) => {
                        info!(
                            dependency = %request.dependency,
                            operation = %request.operation,
                            "Fallback served while circuit open"
                        );
                        return Ok(FailoverOutcome::fallback_success(data));
                    }
                    Err(error) => {
                        warn!(
                            dependency = %request.dependency,
                            operation = %request.operation,
                            error = %error,
                            "Fallback failed while circuit open"
                        );
                    }
                }
            }
            let queued = self.try_defer(&request).await?;
            return Ok(FailoverOutcome::rejected(
                FailoverFailure::CircuitOpen {
                    dependency: request.dependency.clone(),
                },
                queued,
            ));
        }

        // Step 3: the primary runs through the breaker, which settles
        // metrics and state transitions on both outcomes.
        let breaker = self.registry.breaker_for(&request.dependency);
        match breaker.execute(primary).await {
            Ok(data) => Ok(FailoverOutcome::completed(data)),
            Err(CircuitBreakerError::Internal { message }) => {
                Err(BreakwaterError::Internal { message })
            }
            Err(error) => {
                let rejected = matches!(
                    error,
                    CircuitBreakerError::CircuitOpen { .. }
                        | CircuitBreakerError::TooManyTrialCalls
                );
                warn!(
                    dependency = %request.dependency,
                    operation = %request.operation,
                    error = %error,
                    "Primary path did not complete"
                );
                if let Some(fallback) = fallback {
                    match fallback().await {
                        Ok(data) => {
                            info!(
                                dependency = %request.dependency,
                                operation = %request.operation,
                                "Fallback served after primary failure"
                            );
                            return Ok(FailoverOutcome::fallback_success(data));
                        }
                        Err(fallback_error) => {
                            warn!(
                                dependency = %request.dependency,
                                operation = %request.operation,
                                error = %fallback_error,
                                "Fallback failed after primary failure"
                            );
                        }
                    }
                }
                let queued = self.try_defer(&request).await?;
                let failure = if rejected {
                    FailoverFailure::CircuitOpen {
                        dependency: request.dependency.clone(),
                    }
                } else {
                    FailoverFailure::Operation {
                        dependency: request.dependency.clone(),
                        operation: request.operation.clone(),
                        message: error.to_string(),
                    }
                };
                Ok(FailoverOutcome::rejected(failure, queued))
            }
        }
    }

    /// Reject a write under read-only mode, queueing it if opted in
    ///
    /// A queued write is an accepted deferral, not a failure; without the
    /// opt-in the caller gets an explicit rejection to surface.
    async fn reject_read_only<T>(
        &self,
        request: FailoverRequest,
        mode: ReadOnlyMode,
    ) -> Result<FailoverOutcome<T>, BreakwaterError> {
        info!(
            dependency = %request.dependency,
            operation = %request.operation,
            triggered_by = %mode.triggered_by,
            "Write rejected: global read-only mode is active"
        );
        let queued = self.try_defer(&request).await?;
        let failure = if queued.is_some() {
            None
        } else {
            Some(FailoverFailure::ReadOnly {
                dependency: request.dependency.clone(),
                reason: mode.reason,
            })
        };
        Ok(FailoverOutcome {
            success: false,
            degraded: true,
            queued,
            data: None,
            failure,
        })
    }

    /// Check whether the persisted circuit state forbids an attempt
    ///
    /// True only while the recovery timeout is still running. Once it
    /// elapses the call proceeds so the breaker can run its trial.
    async fn circuit_holding_open(
        &self,
        dependency: &DependencyName,
    ) -> Result<bool, BreakwaterError> {
        let Some(record) = self.store.service_status(dependency).await? else {
            return Ok(false);
        };
        if record.circuit_state != CircuitState::Open {
            return Ok(false);
        }
        let recovery_timeout_ms = self
            .registry
            .breaker_for(dependency)
            .config()
            .recovery_timeout_ms;
        let elapsed = record
            .circuit_opened_at
            .map(|opened| Timestamp::now().millis_since(opened));
        Ok(matches!(elapsed, Some(ms) if ms < recovery_timeout_ms))
    }

    /// Enqueue the deferred payload, when the caller provided one
    async fn try_defer(
        &self,
        request: &FailoverRequest,
    ) -> Result<Option<OperationId>, BreakwaterError> {
        let Some(deferred) = &request.deferred else {
            return Ok(None);
        };
        let id = self
            .queue
            .enqueue(EnqueueRequest {
                dependency: request.dependency.clone(),
                payload: deferred.payload.clone(),
                priority: deferred.priority,
                user_id: request.user_id.clone(),
                resource_id: deferred.resource_id.clone(),
                correlation_id: request.correlation_id.clone(),
                max_retries: deferred.max_retries,
            })
            .await?;
        info!(
            dependency = %request.dependency,
            operation = %request.operation,
            operation_id = %id,
            "Deferred operation to the queue"
        );
        Ok(Some(id))
    }

    // ------------------------------------------------------------------
    // Degraded-mode lifecycle
    // ------------------------------------------------------------------

    /// Mark a dependency degraded and apply the requested escalations
    ///
    /// Idempotent: a dependency already marked degraded or offline is
    /// left untouched, including its original reason and escalations.
    pub async fn enter_degraded_mode(
        &self,
        dependency: &DependencyName,
        reason: &str,
        options: DegradedOptions,
    ) -> Result<(), BreakwaterError> {
        let Some(mut record) = self.store.service_status(dependency).await? else {
            return Err(BreakwaterError::Store(StoreError::NotFound {
                entity: "service_status".to_string(),
                id: dependency.to_string(),
            }));
        };
        if !record.status.is_healthy() {
            debug!(
                dependency = %dependency,
                status = record.status.as_str(),
                "Already degraded; entry is a no-op"
            );
            return Ok(());
        }

        let status = if options.offline {
            ServiceStatus::Offline
        } else {
            ServiceStatus::Degraded
        };
        record.status = status;
        record.degradation_reason = Some(reason.to_string());
        record.updated_at = Timestamp::now();
        self.store.update_service_status(&record).await?;

        if options.read_only && self.store.read_only_mode().await?.is_none() {
            self.store
                .set_read_only_mode(Some(ReadOnlyMode {
                    entered_at: Timestamp::now(),
                    reason: reason.to_string(),
                    triggered_by: dependency.clone(),
                }))
                .await?;
            self.metrics.record_degraded_mode(true);
            warn!(dependency = %dependency, "Global read-only mode entered");
        }

        self.registry
            .breaker_for(dependency)
            .force_open(TransitionReason::ForcedOpen)
            .await?;

        {
            let mut audience = self
                .episode_audience
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            audience.insert(dependency.clone(), options.notify.clone());
        }
        self.notify_users(
            &options.notify,
            NotificationKind::ServiceDegraded,
            format!(
                "Service {dependency} is temporarily degraded: {reason}. \
                 Recent changes may be delayed."
            ),
            AlertSeverity::High,
            serde_json::json!({
                "dependency": dependency.to_string(),
                "reason": reason,
            }),
        )
        .await;

        self.append_event(
            "degradation.entered",
            dependency,
            serde_json::json!({
                "reason": reason,
                "status": status.as_str(),
                "read_only": options.read_only,
            }),
        )
        .await;

        warn!(
            dependency = %dependency,
            status = status.as_str(),
            reason = reason,
            "Entered degraded mode"
        );
        Ok(())
    }

    /// Mark a dependency healthy and unwind its degradation episode
    ///
    /// Read-only mode is lifted only when every tracked dependency is
    /// healthy afterwards. Idempotent for an already-healthy dependency.
    pub async fn exit_degraded_mode(
        &self,
        dependency: &DependencyName,
    ) -> Result<(), BreakwaterError> {
        let Some(mut record) = self.store.service_status(dependency).await? else {
            return Err(BreakwaterError::Store(StoreError::NotFound {
                entity: "service_status".to_string(),
                id: dependency.to_string(),
            }));
        };
        if record.status.is_healthy() {
            debug!(dependency = %dependency, "Already healthy; exit is a no-op");
            return Ok(());
        }

        record.status = ServiceStatus::Healthy;
        record.degradation_reason = None;
        record.updated_at = Timestamp::now();
        self.store.update_service_status(&record).await?;

        self.registry
            .breaker_for(dependency)
            .reset(TransitionReason::RecoveryConfirmed)
            .await?;

        self.maybe_lift_read_only().await?;

        // Alert bookkeeping is best-effort; a failed write must not
        // undo the recovery itself.
        match self
            .store
            .resolve_alerts_for_dependency(dependency, "Dependency recovered")
            .await
        {
            Ok(resolved) if resolved > 0 => {
                debug!(dependency = %dependency, resolved, "Resolved active alerts");
            }
            Ok(_) => {}
            Err(error) => {
                warn!(
                    dependency = %dependency,
                    error = %error,
                    "Failed to resolve alerts during recovery"
                );
            }
        }
        if let Err(error) = self
            .store
            .upsert_active_alert(AlertDraft {
                dependency: dependency.clone(),
                alert_type: AlertType::ServiceRecovered,
                severity: AlertSeverity::Low,
                message: format!("{dependency} recovered from degraded mode"),
                details: serde_json::json!({}),
            })
            .await
        {
            warn!(
                dependency = %dependency,
                error = %error,
                "Failed to record recovery alert"
            );
        }

        let audience = {
            let mut map = self
                .episode_audience
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            map.remove(dependency).unwrap_or_default()
        };
        self.notify_users(
            &audience,
            NotificationKind::ServiceRecovered,
            format!("Service {dependency} has recovered. Normal service has resumed."),
            AlertSeverity::Low,
            serde_json::json!({ "dependency": dependency.to_string() }),
        )
        .await;

        self.append_event("degradation.exited", dependency, serde_json::json!({}))
            .await;

        info!(dependency = %dependency, "Exited degraded mode");
        Ok(())
    }

    /// Clear the read-only flag once no dependency is degraded
    async fn maybe_lift_read_only(&self) -> Result<(), BreakwaterError> {
        if self.store.read_only_mode().await?.is_none() {
            return Ok(());
        }
        let statuses = self.store.all_service_statuses().await?;
        let blocked: Vec<&DependencyName> = statuses
            .iter()
            .filter(|record| !record.status.is_healthy())
            .map(|record| &record.dependency)
            .collect();
        if blocked.is_empty() {
            self.store.set_read_only_mode(None).await?;
            self.metrics.record_degraded_mode(false);
            info!("Global read-only mode lifted: all dependencies healthy");
        } else {
            debug!(
                still_degraded = blocked.len(),
                "Read-only mode stays active until every dependency recovers"
            );
        }
        Ok(())
    }

    /// Record notification intents, logging failures without propagating
    async fn notify_users(
        &self,
        users: &[UserId],
        kind: NotificationKind,
        message: String,
        severity: AlertSeverity,
        metadata: serde_json::Value,
    ) {
        for user in users {
            let notification = UserNotification::new(
                user.clone(),
                kind,
                message.clone(),
                severity,
                metadata.clone(),
            );
            if let Err(error) = self.store.insert_notification(&notification).await {
                warn!(
                    user = user.as_str(),
                    error = %error,
                    "Failed to record notification"
                );
            }
        }
    }

    /// Append an audit event, logging failures without propagating
    async fn append_event(
        &self,
        event_type: &str,
        dependency: &DependencyName,
        payload: serde_json::Value,
    ) {
        let event = SystemEvent::new(event_type, Some(dependency.clone()), payload);
        if let Err(error) = self.store.append_system_event(&event).await {
            warn!(
                event_type,
                error = %error,
                "Failed to append system event"
            );
        }
    }
}

impl std::fmt::Debug for DegradationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
