//! Scheduled probe batches, rolling aggregates, and alert evaluation.

use crate::circuit_breaker::{BreakerRegistry, CircuitState};
use crate::degradation::{DegradationHandler, DegradedOptions};
use crate::health::probes::{run_probe, ProbeContext};
use crate::health::{
    DependencyPolicy, HealthAggregates, HealthStatus, MonitorSettings, ERROR_RATE_HIGH,
    ERROR_RATE_MEDIUM,
};
use crate::metrics::ResilienceMetrics;
use crate::persistence::{
    AlertDraft, AlertSeverity, AlertType, HealthCheckConfig, HealthCheckResult, ResilienceStore,
    StoreError,
};
use crate::{BreakwaterError, DependencyName, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

// ============================================================================
// Health Monitor
// ============================================================================

/// Scheduled synthetic health checking for every tracked dependency
///
/// Each batch probes the dependencies in policy order, persists every
/// result, refreshes the rolling aggregates on the status row, and
/// evaluates the alert rules. Threshold crossings go through the
/// degradation handler, so the monitor is what moves the system into
/// and out of degraded mode unattended.
///
/// Batches never overlap: a scheduled tick that lands while a batch is
/// in flight is skipped, and a manual run waits its turn.
pub struct HealthMonitor {
    worker: MonitorWorker,
    runner: Mutex<Option<MonitorRunner>>,
}

/// Handle owned while the probe loop runs
struct MonitorRunner {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Create a monitor; the probe loop starts with [`HealthMonitor::start`]
    pub fn new(
        store: Arc<dyn ResilienceStore>,
        registry: Arc<BreakerRegistry>,
        degradation: Arc<DegradationHandler>,
        metrics: Arc<dyn ResilienceMetrics>,
        policies: Vec<DependencyPolicy>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            worker: MonitorWorker {
                store,
                registry,
                degradation,
                metrics,
                policies: Arc::new(policies),
                settings,
                batch_lock: Arc::new(Mutex::new(())),
                healthy_streaks: Arc::new(StdMutex::new(HashMap::new())),
            },
            runner: Mutex::new(None),
        }
    }

    /// Dependencies covered by the monitor's policies
    pub fn dependencies(&self) -> Vec<DependencyName> {
        self.worker
            .policies
            .iter()
            .map(|policy| policy.dependency.clone())
            .collect()
    }

    /// Start the scheduled probe loop
    ///
    /// The batch period comes from the stored configuration at start
    /// time; the remaining fields are reloaded on every tick. Returns
    /// `false` when the loop is already running.
    pub async fn start(&self) -> bool {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            return false;
        }

        let interval_ms = match self.worker.store.health_check_config().await {
            Ok(Some(config)) => config.interval_ms,
            Ok(None) => HealthCheckConfig::default().interval_ms,
            Err(error) => {
                warn!(
                    error = %error,
                    "Failed to load health check configuration, using default interval"
                );
                HealthCheckConfig::default().interval_ms
            }
        };

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(self.worker.clone().monitor_loop(interval_ms, stop_rx));
        *runner = Some(MonitorRunner { stop, handle });

        info!(
            interval_ms,
            dependencies = self.worker.policies.len(),
            "Health monitor started"
        );
        true
    }

    /// Stop the probe loop and wait for an in-flight batch to finish
    ///
    /// Returns `false` when the loop was not running.
    pub async fn stop(&self) -> bool {
        let runner = { self.runner.lock().await.take() };
        let Some(runner) = runner else {
            return false;
        };

        let _ = runner.stop.send(true);
        let _ = runner.handle.await;
        info!("Health monitor stopped");
        true
    }

    /// Check if the probe loop is running
    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Run one probe batch immediately, waiting for any batch in flight
    ///
    /// Runs even while scheduled probing is disabled or stopped, and
    /// returns the batch-level status per dependency.
    pub async fn run_batch_now(
        &self,
    ) -> Result<Vec<(DependencyName, HealthStatus)>, BreakwaterError> {
        self.worker.manual_batch().await
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field(
                "dependencies",
                &self
                    .worker
                    .policies
                    .iter()
                    .map(|policy| &policy.dependency)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================================================
// Monitor Worker
// ============================================================================

/// Shared state the probe loop and manual batches operate on
///
/// Clones share the batch guard, so a manual run and a scheduled tick
/// can never probe concurrently.
#[derive(Clone)]
struct MonitorWorker {
    store: Arc<dyn ResilienceStore>,
    registry: Arc<BreakerRegistry>,
    degradation: Arc<DegradationHandler>,
    metrics: Arc<dyn ResilienceMetrics>,
    policies: Arc<Vec<DependencyPolicy>>,
    settings: MonitorSettings,
    batch_lock: Arc<Mutex<()>>,
    /// Consecutive fully healthy batches per dependency
    healthy_streaks: Arc<StdMutex<HashMap<DependencyName, u32>>>,
}

impl MonitorWorker {
    async fn monitor_loop(self, interval_ms: u64, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.scheduled_batch().await,
                _ = stop.changed() => break,
            }
        }
        debug!("Health monitor loop stopped");
    }

    async fn scheduled_batch(&self) {
        let Ok(_guard) = self.batch_lock.try_lock() else {
            debug!("Probe batch already in flight, skipping tick");
            return;
        };

        let config = match self.load_config().await {
            Ok(config) => config,
            Err(error) => {
                warn!(error = %error, "Failed to load health check configuration");
                return;
            }
        };
        if !config.enabled {
            debug!("Scheduled probing disabled, skipping batch");
            return;
        }

        if let Err(error) = self.run_batch(&config).await {
            warn!(error = %error, "Probe batch failed");
        }
    }

    /// Disabled configuration does not block a manual run
    async fn manual_batch(&self) -> Result<Vec<(DependencyName, HealthStatus)>, BreakwaterError> {
        let _guard = self.batch_lock.lock().await;
        let config = self.load_config().await?;
        self.run_batch(&config).await
    }

    async fn load_config(&self) -> Result<HealthCheckConfig, BreakwaterError> {
        Ok(self.store.health_check_config().await?.unwrap_or_default())
    }

    async fn run_batch(
        &self,
        config: &HealthCheckConfig,
    ) -> Result<Vec<(DependencyName, HealthStatus)>, BreakwaterError> {
        let mut statuses = Vec::with_capacity(self.policies.len());
        for policy in self.policies.iter() {
            let status = self.probe_dependency(policy, config).await?;
            statuses.push((policy.dependency.clone(), status));
        }
        Ok(statuses)
    }

    /// Probe one dependency and settle the consequences
    ///
    /// Returns the batch-level status: the worst classification any
    /// probe in the batch produced.
    async fn probe_dependency(
        &self,
        policy: &DependencyPolicy,
        config: &HealthCheckConfig,
    ) -> Result<HealthStatus, BreakwaterError> {
        let breaker = self.registry.breaker_for(&policy.dependency);
        let ctx = ProbeContext::new(
            &self.settings.probe_prefix,
            config.probe_timeout_ms,
            config.slow_threshold_ms,
        );

        let mut batch = Vec::with_capacity(config.probes.len());
        for probe in &config.probes {
            let outcome = run_probe(*probe, &breaker, &policy.store, &ctx).await;
            self.metrics
                .record_probe_result(&policy.dependency, *probe, outcome.status);
            let result = HealthCheckResult::record(
                policy.dependency.clone(),
                *probe,
                outcome.status,
                outcome.response_time_ms,
                outcome.error_message,
            );
            self.store.append_health_result(&result).await?;
            batch.push(result);
        }

        let recent = self
            .store
            .recent_health_results(&policy.dependency, config.window_size)
            .await?;
        let aggregates = HealthAggregates::from_results(&recent);
        self.store_aggregates(&policy.dependency, &aggregates).await;

        let batch_status = batch
            .iter()
            .map(|result| result.status)
            .max_by_key(|status| match status {
                HealthStatus::Healthy => 0,
                HealthStatus::Degraded => 1,
                HealthStatus::Unhealthy => 2,
            })
            .unwrap_or(HealthStatus::Healthy);

        debug!(
            dependency = %policy.dependency,
            status = batch_status.as_str(),
            error_rate = aggregates.error_rate,
            average_response_time_ms = aggregates.average_response_time_ms,
            "Probe batch settled"
        );

        self.evaluate_alerts(policy, config, &batch, &aggregates, breaker.state())
            .await;
        self.apply_transitions(policy, batch_status).await?;

        Ok(batch_status)
    }

    /// Merge the aggregates into the status row's metrics column
    ///
    /// The column is shared with the breaker's snapshot; each writer
    /// owns its own key.
    async fn store_aggregates(&self, dependency: &DependencyName, aggregates: &HealthAggregates) {
        let value = match serde_json::to_value(aggregates) {
            Ok(value) => value,
            Err(error) => {
                warn!(error = %error, "Failed to serialize health aggregates");
                return;
            }
        };

        let written: Result<(), StoreError> = async {
            let Some(mut record) = self.store.service_status(dependency).await? else {
                return Ok(());
            };
            if !record.health_metrics.is_object() {
                record.health_metrics = serde_json::json!({});
            }
            if let Some(map) = record.health_metrics.as_object_mut() {
                map.insert("probes".to_string(), value);
            }
            record.updated_at = Timestamp::now();
            self.store.update_service_status(&record).await
        }
        .await;

        if let Err(error) = written {
            warn!(
                dependency = %dependency,
                error = %error,
                "Failed to store health aggregates"
            );
        }
    }

    /// Evaluate the alert rules for one dependency's batch
    ///
    /// Alert writes are bookkeeping; failures are logged and never
    /// abort the batch.
    async fn evaluate_alerts(
        &self,
        policy: &DependencyPolicy,
        config: &HealthCheckConfig,
        batch: &[HealthCheckResult],
        aggregates: &HealthAggregates,
        circuit_state: CircuitState,
    ) {
        let dependency = &policy.dependency;
        let mut drafts = Vec::new();

        if circuit_state == CircuitState::Open {
            drafts.push(AlertDraft {
                dependency: dependency.clone(),
                alert_type: AlertType::CircuitOpen,
                severity: AlertSeverity::Critical,
                message: format!("Circuit breaker for {dependency} is open"),
                details: serde_json::json!({ "circuit_state": "open" }),
            });
        }

        if aggregates.error_rate > ERROR_RATE_MEDIUM {
            let severity = if aggregates.error_rate > ERROR_RATE_HIGH {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            drafts.push(AlertDraft {
                dependency: dependency.clone(),
                alert_type: AlertType::HighErrorRate,
                severity,
                message: format!(
                    "Error rate for {dependency} is {:.0}% over the last {} probes",
                    aggregates.error_rate * 100.0,
                    aggregates.total_probes
                ),
                details: serde_json::json!({
                    "error_rate": aggregates.error_rate,
                    "window": aggregates.total_probes,
                }),
            });
        }

        if aggregates.average_response_time_ms > config.slow_threshold_ms as f64 {
            drafts.push(AlertDraft {
                dependency: dependency.clone(),
                alert_type: AlertType::SlowResponse,
                severity: AlertSeverity::Medium,
                message: format!(
                    "Average response time for {dependency} is {:.0}ms",
                    aggregates.average_response_time_ms
                ),
                details: serde_json::json!({
                    "average_response_time_ms": aggregates.average_response_time_ms,
                    "slow_threshold_ms": config.slow_threshold_ms,
                }),
            });
        }

        let failed: Vec<&str> = batch
            .iter()
            .filter(|result| result.status == HealthStatus::Unhealthy)
            .map(|result| result.probe.as_str())
            .collect();
        if !failed.is_empty() {
            drafts.push(AlertDraft {
                dependency: dependency.clone(),
                alert_type: AlertType::ServiceDegraded,
                severity: AlertSeverity::High,
                message: format!("Synthetic probes failed for {dependency}"),
                details: serde_json::json!({ "failed_probes": failed }),
            });
        }

        for draft in drafts {
            let alert_type = draft.alert_type;
            if let Err(error) = self.store.upsert_active_alert(draft).await {
                warn!(
                    dependency = %dependency,
                    alert_type = alert_type.as_str(),
                    error = %error,
                    "Failed to upsert alert"
                );
            }
        }
    }

    /// Cross into or out of degraded mode from the batch status
    ///
    /// Entry happens on any unhealthy batch. Exit requires the
    /// configured number of consecutive fully healthy batches, so one
    /// good batch during a flapping outage does not lift the episode.
    async fn apply_transitions(
        &self,
        policy: &DependencyPolicy,
        batch_status: HealthStatus,
    ) -> Result<(), BreakwaterError> {
        match batch_status {
            HealthStatus::Unhealthy => {
                self.reset_streak(&policy.dependency);
                self.degradation
                    .enter_degraded_mode(
                        &policy.dependency,
                        "Synthetic health probes observed the dependency unhealthy",
                        DegradedOptions {
                            offline: false,
                            read_only: policy.read_only_on_outage,
                            notify: policy.notify.clone(),
                        },
                    )
                    .await?;
            }
            HealthStatus::Degraded => {
                self.reset_streak(&policy.dependency);
            }
            HealthStatus::Healthy => {
                let streak = self.bump_streak(&policy.dependency);
                let record = self.store.service_status(&policy.dependency).await?;
                let in_episode = record
                    .map(|record| !record.status.is_healthy())
                    .unwrap_or(false);
                if in_episode && streak >= self.settings.recovery_batches {
                    info!(
                        dependency = %policy.dependency,
                        streak,
                        "Sustained recovery confirmed"
                    );
                    self.degradation
                        .exit_degraded_mode(&policy.dependency)
                        .await?;
                }
            }
        }
        Ok(())
    }

    fn bump_streak(&self, dependency: &DependencyName) -> u32 {
        let mut streaks = self
            .healthy_streaks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let streak = streaks.entry(dependency.clone()).or_insert(0);
        *streak = streak.saturating_add(1);
        *streak
    }

    fn reset_streak(&self, dependency: &DependencyName) {
        let mut streaks = self
            .healthy_streaks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        streaks.insert(dependency.clone(), 0);
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
