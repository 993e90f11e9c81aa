//! In-memory resilience store.
//!
//! Reference implementation of the persistence contract. Everything
//! lives behind one async lock, which is what makes the capacity check
//! in `insert_operation` and the status flip in `claim_due_operations`
//! atomic here; relational implementations use transactions for the
//! same guarantees.

use crate::persistence::{
    AlertDraft, AlertFilter, BreakerEvent, BreakerSnapshot, HealthCheckConfig, HealthCheckResult,
    QueueStats, QueuedOperation, ReadOnlyMode, ResilienceStore, ServiceAlert, ServiceStatusRecord,
    StoreError, SystemEvent, UserNotification,
};
use crate::{AlertId, DependencyName, OperationId, OperationStatus, Timestamp, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    statuses: HashMap<DependencyName, ServiceStatusRecord>,
    read_only: Option<ReadOnlyMode>,
    breaker_events: Vec<BreakerEvent>,
    health_results: Vec<HealthCheckResult>,
    health_config: Option<HealthCheckConfig>,
    alerts: Vec<ServiceAlert>,
    operations: HashMap<OperationId, QueuedOperation>,
    notifications: Vec<UserNotification>,
    system_events: Vec<SystemEvent>,
}

/// In-memory [`ResilienceStore`] for tests and embedded use
#[derive(Debug, Default)]
pub struct MemoryResilienceStore {
    inner: RwLock<Inner>,
    failing: AtomicBool,
}

impl MemoryResilienceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store call fail with [`StoreError::Io`]
    ///
    /// Exercises the paths that must survive persistence loss.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Total breaker events appended, across dependencies
    pub async fn breaker_event_count(&self) -> usize {
        self.inner.read().await.breaker_events.len()
    }

    /// Total probe results appended, across dependencies
    pub async fn health_result_count(&self) -> usize {
        self.inner.read().await.health_results.len()
    }

    fn admit(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                message: "injected store failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResilienceStore for MemoryResilienceStore {
    // ---- service status -------------------------------------------------

    async fn init_service_status(&self, record: ServiceStatusRecord) -> Result<(), StoreError> {
        self.admit()?;
        let mut inner = self.inner.write().await;
        inner
            .statuses
            .entry(record.dependency.clone())
            .or_insert(record);
        Ok(())
    }

    async fn service_status(
        &self,
        dependency: &DependencyName,
    ) -> Result<Option<ServiceStatusRecord>, StoreError> {
        self.admit()?;
        Ok(self.inner.read().await.statuses.get(dependency).cloned())
    }

    async fn all_service_statuses(&self) -> Result<Vec<ServiceStatusRecord>, StoreError> {
        self.admit()?;
        let inner = self.inner.read().await;
        let mut records: Vec<ServiceStatusRecord> = inner.statuses.values().cloned().collect();
        records.sort_by(|a, b| a.dependency.as_str().cmp(b.dependency.as_str()));
        Ok(records)
    }

    async fn update_service_status(&self, record: &ServiceStatusRecord) -> Result<(), StoreError> {
        self.admit()?;
        let mut inner = self.inner.write().await;
        inner
            .statuses
            .insert(record.dependency.clone(), record.clone());
        Ok(())
    }

    async fn record_breaker_snapshot(
        &self,
        dependency: &DependencyName,
        snapshot: BreakerSnapshot,
    ) -> Result<(), StoreError> {
        self.admit()?;
        let metrics = serde_json::to_value(&snapshot.metrics).map_err(|e| {
            StoreError::Serialization {
                message: e.to_string(),
            }
        })?;

        let mut inner = self.inner.write().await;
        let record = inner
            .statuses
            .entry(dependency.clone())
            .or_insert_with(|| ServiceStatusRecord::healthy(dependency.clone()));
        record.circuit_state = snapshot.circuit_state;
        record.circuit_opened_at = snapshot.circuit_opened_at;
        record.failure_count = snapshot.failure_count;
        // The metrics column is shared with the monitor's probe
        // aggregates; each writer owns its own key.
        if !record.health_metrics.is_object() {
            record.health_metrics = serde_json::json!({});
        }
        if let Some(map) = record.health_metrics.as_object_mut() {
            map.insert("breaker".to_string(), metrics);
        }
        record.updated_at = Timestamp::now();
        Ok(())
    }

    // ---- read-only flag -------------------------------------------------

    async fn read_only_mode(&self) -> Result<Option<ReadOnlyMode>, StoreError> {
        self.admit()?;
        Ok(self.inner.read().await.read_only.clone())
    }

    async fn set_read_only_mode(&self, mode: Option<ReadOnlyMode>) -> Result<(), StoreError> {
        self.admit()?;
        self.inner.write().await.read_only = mode;
        Ok(())
    }

    // ---- circuit breaker events -----------------------------------------

    async fn append_breaker_event(&self, event: &BreakerEvent) -> Result<(), StoreError> {
        self.admit()?;
        self.inner.write().await.breaker_events.push(event.clone());
        Ok(())
    }

    async fn breaker_events(
        &self,
        dependency: &DependencyName,
        limit: usize,
    ) -> Result<Vec<BreakerEvent>, StoreError> {
        self.admit()?;
        let inner = self.inner.read().await;
        let mut events: Vec<BreakerEvent> = inner
            .breaker_events
            .iter()
            .filter(|e| &e.dependency == dependency)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.id.cmp(&a.id));
        events.truncate(limit);
        Ok(events)
    }

    // ---- health history -------------------------------------------------

    async fn append_health_result(&self, result: &HealthCheckResult) -> Result<(), StoreError> {
        self.admit()?;
        self.inner.write().await.health_results.push(result.clone());
        Ok(())
    }

    async fn recent_health_results(
        &self,
        dependency: &DependencyName,
        limit: usize,
    ) -> Result<Vec<HealthCheckResult>, StoreError> {
        self.admit()?;
        let inner = self.inner.read().await;
        let mut results: Vec<HealthCheckResult> = inner
            .health_results
            .iter()
            .filter(|r| &r.dependency == dependency)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.id.cmp(&a.id));
        results.truncate(limit);
        Ok(results)
    }

    async fn health_check_config(&self) -> Result<Option<HealthCheckConfig>, StoreError> {
        self.admit()?;
        Ok(self.inner.read().await.health_config.clone())
    }

    async fn put_health_check_config(&self, config: &HealthCheckConfig) -> Result<(), StoreError> {
        self.admit()?;
        self.inner.write().await.health_config = Some(config.clone());
        Ok(())
    }

    // ---- alerts ---------------------------------------------------------

    async fn upsert_active_alert(&self, draft: AlertDraft) -> Result<ServiceAlert, StoreError> {
        self.admit()?;
        let now = Timestamp::now();
        let mut inner = self.inner.write().await;

        if let Some(alert) = inner.alerts.iter_mut().find(|a| {
            a.dependency == draft.dependency
                && a.alert_type == draft.alert_type
                && a.is_active()
        }) {
            alert.occurrence_count += 1;
            alert.last_observed_at = now;
            alert.severity = draft.severity;
            alert.message = draft.message;
            alert.details = draft.details;
            return Ok(alert.clone());
        }

        let alert = ServiceAlert {
            id: AlertId::new(),
            dependency: draft.dependency,
            alert_type: draft.alert_type,
            severity: draft.severity,
            message: draft.message,
            details: draft.details,
            occurrence_count: 1,
            created_at: now,
            last_observed_at: now,
            resolved_at: None,
            resolution_notes: None,
        };
        inner.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn alerts(&self, filter: AlertFilter) -> Result<Vec<ServiceAlert>, StoreError> {
        self.admit()?;
        let inner = self.inner.read().await;
        let mut alerts: Vec<ServiceAlert> = inner
            .alerts
            .iter()
            .filter(|a| {
                filter
                    .dependency
                    .as_ref()
                    .map(|d| &a.dependency == d)
                    .unwrap_or(true)
                    && (!filter.active_only || a.is_active())
                    && filter.severity.map(|s| a.severity == s).unwrap_or(true)
            })
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.last_observed_at.cmp(&a.last_observed_at));
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    async fn resolve_alert(
        &self,
        id: &AlertId,
        notes: Option<String>,
    ) -> Result<Option<ServiceAlert>, StoreError> {
        self.admit()?;
        let mut inner = self.inner.write().await;
        let Some(alert) = inner.alerts.iter_mut().find(|a| &a.id == id) else {
            return Ok(None);
        };
        if alert.is_active() {
            alert.resolved_at = Some(Timestamp::now());
            alert.resolution_notes = notes;
        }
        Ok(Some(alert.clone()))
    }

    async fn resolve_alerts_for_dependency(
        &self,
        dependency: &DependencyName,
        notes: &str,
    ) -> Result<usize, StoreError> {
        self.admit()?;
        let now = Timestamp::now();
        let mut inner = self.inner.write().await;
        let mut resolved = 0;
        for alert in inner
            .alerts
            .iter_mut()
            .filter(|a| &a.dependency == dependency && a.is_active())
        {
            alert.resolved_at = Some(now);
            alert.resolution_notes = Some(notes.to_string());
            resolved += 1;
        }
        Ok(resolved)
    }

    // ---- operation queue ------------------------------------------------

    async fn insert_operation(
        &self,
        operation: &QueuedOperation,
        capacity: usize,
    ) -> Result<(), StoreError> {
        self.admit()?;
        let mut inner = self.inner.write().await;

        if inner.operations.contains_key(&operation.id) {
            return Err(StoreError::Conflict {
                message: format!("operation {} already exists", operation.id),
            });
        }

        let live = inner
            .operations
            .values()
            .filter(|op| !op.status.is_terminal())
            .count();
        if live >= capacity {
            return Err(StoreError::CapacityExceeded { capacity });
        }

        inner.operations.insert(operation.id, operation.clone());
        Ok(())
    }

    async fn operation(&self, id: &OperationId) -> Result<Option<QueuedOperation>, StoreError> {
        self.admit()?;
        Ok(self.inner.read().await.operations.get(id).cloned())
    }

    async fn update_operation(&self, operation: &QueuedOperation) -> Result<(), StoreError> {
        self.admit()?;
        let mut inner = self.inner.write().await;
        if !inner.operations.contains_key(&operation.id) {
            return Err(StoreError::NotFound {
                entity: "operation".to_string(),
                id: operation.id.as_str(),
            });
        }
        inner.operations.insert(operation.id, operation.clone());
        Ok(())
    }

    async fn claim_due_operations(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<QueuedOperation>, StoreError> {
        self.admit()?;
        let mut inner = self.inner.write().await;

        // Drain order: priority first, then age.
        let mut due: Vec<(crate::OperationPriority, Timestamp, OperationId)> = inner
            .operations
            .values()
            .filter(|op| op.status == OperationStatus::Pending && op.scheduled_at <= now)
            .map(|op| (op.priority, op.created_at, op.id))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, _, id) in due {
            if let Some(op) = inner.operations.get_mut(&id) {
                op.status = OperationStatus::Processing;
                op.claimed_at = Some(now);
                claimed.push(op.clone());
            }
        }
        Ok(claimed)
    }

    async fn requeue_stuck_operations(
        &self,
        claimed_before: Timestamp,
    ) -> Result<Vec<OperationId>, StoreError> {
        self.admit()?;
        let mut inner = self.inner.write().await;
        let mut requeued = Vec::new();
        for op in inner.operations.values_mut() {
            if op.status == OperationStatus::Processing
                && op.claimed_at.map(|at| at < claimed_before).unwrap_or(true)
            {
                op.status = OperationStatus::Pending;
                op.claimed_at = None;
                requeued.push(op.id);
            }
        }
        Ok(requeued)
    }

    async fn purge_terminal_operations(
        &self,
        completed_before: Timestamp,
    ) -> Result<usize, StoreError> {
        self.admit()?;
        let mut inner = self.inner.write().await;
        let before = inner.operations.len();
        inner.operations.retain(|_, op| {
            !(op.status.is_terminal()
                && op.completed_at.map(|at| at < completed_before).unwrap_or(false))
        });
        Ok(before - inner.operations.len())
    }

    async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        self.admit()?;
        let inner = self.inner.read().await;
        let mut stats = QueueStats::default();
        for op in inner.operations.values() {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Processing => stats.processing += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    // ---- notifications --------------------------------------------------

    async fn insert_notification(
        &self,
        notification: &UserNotification,
    ) -> Result<(), StoreError> {
        self.admit()?;
        self.inner
            .write()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }

    async fn notifications_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<UserNotification>, StoreError> {
        self.admit()?;
        let inner = self.inner.read().await;
        let mut notifications: Vec<UserNotification> = inner
            .notifications
            .iter()
            .filter(|n| &n.user_id == user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.id.cmp(&a.id));
        notifications.truncate(limit);
        Ok(notifications)
    }

    // ---- system events --------------------------------------------------

    async fn append_system_event(&self, event: &SystemEvent) -> Result<(), StoreError> {
        self.admit()?;
        self.inner.write().await.system_events.push(event.clone());
        Ok(())
    }

    async fn recent_system_events(&self, limit: usize) -> Result<Vec<SystemEvent>, StoreError> {
        self.admit()?;
        let inner = self.inner.read().await;
        let mut events: Vec<SystemEvent> = inner.system_events.clone();
        events.sort_by(|a, b| b.id.cmp(&a.id));
        events.truncate(limit);
        Ok(events)
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
