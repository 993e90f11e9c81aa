//! Circuit breaker implementation and per-dependency registry.

use crate::circuit_breaker::{
    BreakerDefaults, BreakerMetrics, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    CircuitSummary, TransitionReason, LATENCY_EMA_ALPHA,
};
use crate::metrics::{CallOutcome, ResilienceMetrics};
use crate::persistence::{BreakerEvent, BreakerSnapshot, ResilienceStore};
use crate::{BreakwaterError, DependencyName, Timestamp};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Internal State
// ============================================================================

/// Mutable breaker state behind the lock
#[derive(Debug)]
struct InternalState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_inflight: u32,
    opened_at: Option<Timestamp>,
    next_attempt_at: Option<Timestamp>,
    last_failure_at: Option<Timestamp>,
    last_success_at: Option<Timestamp>,
    last_state_change: Timestamp,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    slow_calls: u64,
    rejected_calls: u64,
    average_response_time_ms: f64,
}

impl InternalState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_inflight: 0,
            opened_at: None,
            next_attempt_at: None,
            last_failure_at: None,
            last_success_at: None,
            last_state_change: Timestamp::now(),
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            slow_calls: 0,
            rejected_calls: 0,
            average_response_time_ms: 0.0,
        }
    }

    fn metrics(&self) -> BreakerMetrics {
        BreakerMetrics {
            state: self.state,
            total_calls: self.total_calls,
            successful_calls: self.successful_calls,
            failed_calls: self.failed_calls,
            slow_calls: self.slow_calls,
            rejected_calls: self.rejected_calls,
            consecutive_failures: self.consecutive_failures,
            average_response_time_ms: self.average_response_time_ms,
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
            last_state_change: self.last_state_change,
            next_attempt_at: self.next_attempt_at,
        }
    }

    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            circuit_state: self.state,
            circuit_opened_at: self.opened_at,
            failure_count: self.consecutive_failures,
            metrics: self.metrics(),
        }
    }

    /// Fold one observed latency into the moving average
    fn record_latency(&mut self, elapsed_ms: u64) {
        let sample = elapsed_ms as f64;
        if self.total_calls <= 1 {
            self.average_response_time_ms = sample;
        } else {
            self.average_response_time_ms = LATENCY_EMA_ALPHA * sample
                + (1.0 - LATENCY_EMA_ALPHA) * self.average_response_time_ms;
        }
    }

    fn transition(&mut self, to: CircuitState, now: Timestamp) -> CircuitState {
        let from = self.state;
        self.state = to;
        self.last_state_change = now;
        from
    }

    fn trip(&mut self, now: Timestamp, recovery_timeout_ms: u64) {
        self.transition(CircuitState::Open, now);
        self.opened_at = Some(now);
        self.next_attempt_at = Some(now.add_millis(recovery_timeout_ms));
        self.consecutive_successes = 0;
        self.half_open_inflight = 0;
    }

    fn close(&mut self, now: Timestamp) {
        self.transition(CircuitState::Closed, now);
        self.opened_at = None;
        self.next_attempt_at = None;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_inflight = 0;
    }
}

/// Admission decision taken before a call runs
enum Admission {
    /// Call may proceed; `trial` marks a half-open probe slot
    Proceed { trial: bool },
    /// Circuit is open, reject without invoking the dependency
    RejectOpen { retry_after_ms: Option<u64> },
    /// Half-open trial slots exhausted
    RejectTrialCap,
}

/// Transition observed under the lock, flushed to the store afterwards
#[derive(Debug, Clone, Copy)]
struct PendingTransition {
    from: CircuitState,
    to: CircuitState,
    reason: TransitionReason,
}

/// Outcome of a locked state mutation plus what must be persisted
struct Settled {
    transition: Option<PendingTransition>,
    snapshot: BreakerSnapshot,
}

// ============================================================================
// Dependency Breaker
// ============================================================================

/// Circuit breaker guarding one named dependency
///
/// Thread-safe; clone the surrounding [`Arc`] to share across monitor,
/// queue drainer, and request paths. Calls are generic so one breaker
/// serves reads, writes, and probes alike. State transitions are
/// written through to the resilience store after the state lock is
/// released, so persistence latency never extends the critical section.
pub struct DependencyBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<InternalState>,
    store: Arc<dyn ResilienceStore>,
    metrics: Arc<dyn ResilienceMetrics>,
}

impl DependencyBreaker {
    /// Create a breaker for a dependency
    pub fn new(
        config: CircuitBreakerConfig,
        store: Arc<dyn ResilienceStore>,
        metrics: Arc<dyn ResilienceMetrics>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(InternalState::new()),
            store,
            metrics,
        }
    }

    /// Get the breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Dependency this breaker guards
    pub fn dependency(&self) -> &DependencyName {
        &self.config.dependency
    }

    /// Execute a guarded call with the configured operation timeout
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_timeout(self.config.operation_timeout_ms, operation)
            .await
    }

    /// Execute a guarded call with an explicit timeout
    ///
    /// The timeout runs inside the breaker, so an expiry is settled as
    /// a failure before the error is returned; callers must not wrap
    /// the returned future in their own timeout or the settlement is
    /// lost when the future is dropped.
    pub async fn execute_with_timeout<T, E, F, Fut>(
        &self,
        timeout_ms: u64,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = Timestamp::now();
        let (admission, promotion) = self.admit(now)?;

        // The open->half-open promotion happened at admission; persist it
        // before the trial call runs so the event log stays ordered.
        if let Some(transition) = promotion {
            let snapshot = self.current_snapshot();
            self.flush(&[transition], snapshot).await;
        }

        let trial = match admission {
            Admission::Proceed { trial } => trial,
            Admission::RejectOpen { retry_after_ms } => {
                let snapshot = self.record_rejection()?;
                self.flush(&[], snapshot).await;
                self.metrics.record_rejected_call(&self.config.dependency);
                debug!(
                    dependency = %self.config.dependency,
                    retry_after_ms = ?retry_after_ms,
                    "Circuit open, call rejected"
                );
                return Err(CircuitBreakerError::CircuitOpen { retry_after_ms });
            }
            Admission::RejectTrialCap => {
                let snapshot = self.record_rejection()?;
                self.flush(&[], snapshot).await;
                self.metrics.record_rejected_call(&self.config.dependency);
                debug!(
                    dependency = %self.config.dependency,
                    "Half-open trial slots exhausted, call rejected"
                );
                return Err(CircuitBreakerError::TooManyTrialCalls);
            }
        };

        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(Duration::from_millis(timeout_ms), operation()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(value)) => {
                let settled = self.settle_success(elapsed_ms, trial)?;
                let transitions: Vec<_> = settled.transition.into_iter().collect();
                self.flush(&transitions, settled.snapshot).await;
                let outcome = if elapsed_ms >= self.config.slow_call_threshold_ms {
                    CallOutcome::Slow
                } else {
                    CallOutcome::Success
                };
                self.metrics
                    .record_call(&self.config.dependency, outcome, elapsed_ms);
                Ok(value)
            }
            Ok(Err(error)) => {
                let settled = self.settle_failure(elapsed_ms, trial)?;
                let transitions: Vec<_> = settled.transition.into_iter().collect();
                self.flush(&transitions, settled.snapshot).await;
                self.metrics
                    .record_call(&self.config.dependency, CallOutcome::Failure, elapsed_ms);
                Err(CircuitBreakerError::OperationFailed(error))
            }
            Err(_elapsed) => {
                let settled = self.settle_failure(elapsed_ms, trial)?;
                let transitions: Vec<_> = settled.transition.into_iter().collect();
                self.flush(&transitions, settled.snapshot).await;
                self.metrics
                    .record_call(&self.config.dependency, CallOutcome::Timeout, elapsed_ms);
                Err(CircuitBreakerError::Timeout {
                    timeout_ms,
                })
            }
        }
    }

    /// Current circuit state
    ///
    /// Reports open when the state lock is poisoned: failing closed
    /// could route calls into a dependency already known to be down.
    pub fn state(&self) -> CircuitState {
        self.state
            .read()
            .map(|s| s.state)
            .unwrap_or(CircuitState::Open)
    }

    /// Current statistics snapshot
    pub fn metrics(&self) -> BreakerMetrics {
        self.state
            .read()
            .map(|s| s.metrics())
            .unwrap_or_else(|_| BreakerMetrics::unavailable())
    }

    /// Snapshot for the admin surface
    pub fn summary(&self) -> CircuitSummary {
        let metrics = self.metrics();
        CircuitSummary {
            dependency: self.config.dependency.clone(),
            state: metrics.state,
            metrics: metrics.clone(),
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: self.config.recovery_timeout_ms,
        }
    }

    /// Check whether a call would currently be admitted
    ///
    /// Non-binding: admission is re-decided when the call executes.
    pub fn can_attempt(&self) -> bool {
        let now = Timestamp::now();
        match self.state.read() {
            Ok(s) => match s.state {
                CircuitState::Closed => true,
                CircuitState::HalfOpen => s.half_open_inflight < self.config.half_open_max_probes,
                CircuitState::Open => s
                    .next_attempt_at
                    .map(|at| now >= at)
                    .unwrap_or(false),
            },
            Err(_) => false,
        }
    }

    /// Close the circuit and clear failure counters
    pub async fn reset(&self, reason: TransitionReason) -> Result<CircuitState, BreakwaterError> {
        let now = Timestamp::now();
        let settled = {
            let mut state = self.state.write().map_err(lock_poisoned)?;
            let transition = if state.state == CircuitState::Closed {
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                None
            } else {
                let from = state.state;
                state.close(now);
                Some(PendingTransition {
                    from,
                    to: CircuitState::Closed,
                    reason,
                })
            };
            Settled {
                transition,
                snapshot: state.snapshot(),
            }
        };

        let transitions: Vec<_> = settled.transition.into_iter().collect();
        self.flush(&transitions, settled.snapshot).await;
        info!(
            dependency = %self.config.dependency,
            reason = reason.as_str(),
            "Circuit breaker reset"
        );
        Ok(CircuitState::Closed)
    }

    /// Force the circuit open, starting a fresh recovery timer
    pub async fn force_open(
        &self,
        reason: TransitionReason,
    ) -> Result<CircuitState, BreakwaterError> {
        let now = Timestamp::now();
        let settled = {
            let mut state = self.state.write().map_err(lock_poisoned)?;
            let transition = if state.state == CircuitState::Open {
                // Already open: restart the timer without a new event.
                state.next_attempt_at = Some(now.add_millis(self.config.recovery_timeout_ms));
                None
            } else {
                let from = state.state;
                state.trip(now, self.config.recovery_timeout_ms);
                Some(PendingTransition {
                    from,
                    to: CircuitState::Open,
                    reason,
                })
            };
            Settled {
                transition,
                snapshot: state.snapshot(),
            }
        };

        let transitions: Vec<_> = settled.transition.into_iter().collect();
        self.flush(&transitions, settled.snapshot).await;
        info!(
            dependency = %self.config.dependency,
            reason = reason.as_str(),
            "Circuit breaker forced open"
        );
        Ok(CircuitState::Open)
    }

    // ------------------------------------------------------------------
    // Locked state mutations
    // ------------------------------------------------------------------

    /// Decide admission, promoting open->half-open when the timer elapsed
    fn admit<E>(
        &self,
        now: Timestamp,
    ) -> Result<(Admission, Option<PendingTransition>), CircuitBreakerError<E>> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CircuitBreakerError::Internal {
                message: "circuit state lock poisoned".to_string(),
            })?;

        match state.state {
            CircuitState::Closed => Ok((Admission::Proceed { trial: false }, None)),
            CircuitState::HalfOpen => {
                if state.half_open_inflight >= self.config.half_open_max_probes {
                    Ok((Admission::RejectTrialCap, None))
                } else {
                    state.half_open_inflight += 1;
                    Ok((Admission::Proceed { trial: true }, None))
                }
            }
            CircuitState::Open => {
                let due = state.next_attempt_at.map(|at| now >= at).unwrap_or(true);
                if due {
                    let from = state.transition(CircuitState::HalfOpen, now);
                    state.consecutive_successes = 0;
                    state.half_open_inflight = 1;
                    state.next_attempt_at = None;
                    Ok((
                        Admission::Proceed { trial: true },
                        Some(PendingTransition {
                            from,
                            to: CircuitState::HalfOpen,
                            reason: TransitionReason::RecoveryTimeout,
                        }),
                    ))
                } else {
                    let retry_after_ms = state
                        .next_attempt_at
                        .map(|at| at.duration_since(now).as_millis() as u64);
                    Ok((Admission::RejectOpen { retry_after_ms }, None))
                }
            }
        }
    }

    fn record_rejection<E>(&self) -> Result<BreakerSnapshot, CircuitBreakerError<E>> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CircuitBreakerError::Internal {
                message: "circuit state lock poisoned".to_string(),
            })?;
        state.rejected_calls += 1;
        Ok(state.snapshot())
    }

    fn settle_success<E>(
        &self,
        elapsed_ms: u64,
        trial: bool,
    ) -> Result<Settled, CircuitBreakerError<E>> {
        let now = Timestamp::now();
        let mut state = self
            .state
            .write()
            .map_err(|_| CircuitBreakerError::Internal {
                message: "circuit state lock poisoned".to_string(),
            })?;

        state.total_calls += 1;
        state.successful_calls += 1;
        state.record_latency(elapsed_ms);
        state.last_success_at = Some(now);
        state.consecutive_failures = 0;
        if elapsed_ms >= self.config.slow_call_threshold_ms {
            // Slow but successful: tracked for alerting, never trips.
            state.slow_calls += 1;
        }

        let transition = match state.state {
            CircuitState::HalfOpen => {
                if trial {
                    state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
                }
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    let from = state.state;
                    state.close(now);
                    Some(PendingTransition {
                        from,
                        to: CircuitState::Closed,
                        reason: TransitionReason::RecoverySuccesses,
                    })
                } else {
                    None
                }
            }
            CircuitState::Open => {
                // A stale trial finished after the circuit re-opened.
                if trial {
                    state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
                }
                None
            }
            CircuitState::Closed => None,
        };

        Ok(Settled {
            transition,
            snapshot: state.snapshot(),
        })
    }

    fn settle_failure<E>(
        &self,
        elapsed_ms: u64,
        trial: bool,
    ) -> Result<Settled, CircuitBreakerError<E>> {
        let now = Timestamp::now();
        let mut state = self
            .state
            .write()
            .map_err(|_| CircuitBreakerError::Internal {
                message: "circuit state lock poisoned".to_string(),
            })?;

        state.total_calls += 1;
        state.failed_calls += 1;
        state.record_latency(elapsed_ms);
        state.last_failure_at = Some(now);
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;

        let transition = match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    let from = state.state;
                    state.trip(now, self.config.recovery_timeout_ms);
                    Some(PendingTransition {
                        from,
                        to: CircuitState::Open,
                        reason: TransitionReason::FailureThreshold,
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if trial {
                    state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
                }
                let from = state.state;
                state.trip(now, self.config.recovery_timeout_ms);
                Some(PendingTransition {
                    from,
                    to: CircuitState::Open,
                    reason: TransitionReason::TrialFailure,
                })
            }
            CircuitState::Open => {
                // A stale trial failed after the circuit already re-opened.
                if trial {
                    state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
                }
                None
            }
        };

        Ok(Settled {
            transition,
            snapshot: state.snapshot(),
        })
    }

    fn current_snapshot(&self) -> BreakerSnapshot {
        self.state
            .read()
            .map(|s| s.snapshot())
            .unwrap_or_else(|_| BreakerSnapshot {
                circuit_state: CircuitState::Open,
                circuit_opened_at: None,
                failure_count: 0,
                metrics: BreakerMetrics::unavailable(),
            })
    }

    // ------------------------------------------------------------------
    // Write-through
    // ------------------------------------------------------------------

    /// Persist transitions and the latest snapshot
    ///
    /// Store failures are logged, never propagated: persistence trouble
    /// must not change the outcome of the guarded call.
    async fn flush(&self, transitions: &[PendingTransition], snapshot: BreakerSnapshot) {
        for transition in transitions {
            info!(
                dependency = %self.config.dependency,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                reason = transition.reason.as_str(),
                "Circuit breaker transition"
            );
            self.metrics.record_breaker_transition(
                &self.config.dependency,
                transition.from,
                transition.to,
            );
            let event = BreakerEvent::new(
                self.config.dependency.clone(),
                transition.from,
                transition.to,
                transition.reason,
                snapshot.metrics.clone(),
            );
            if let Err(error) = self.store.append_breaker_event(&event).await {
                warn!(
                    dependency = %self.config.dependency,
                    error = %error,
                    "Failed to append circuit breaker event"
                );
            }
        }

        self.metrics
            .record_breaker_state(&self.config.dependency, snapshot.circuit_state);
        if let Err(error) = self
            .store
            .record_breaker_snapshot(&self.config.dependency, snapshot)
            .await
        {
            warn!(
                dependency = %self.config.dependency,
                error = %error,
                "Failed to persist circuit breaker snapshot"
            );
        }
    }
}

impl std::fmt::Debug for DependencyBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyBreaker")
            .field("dependency", &self.config.dependency)
            .field("state", &self.state())
            .finish()
    }
}

fn lock_poisoned<T>(_: PoisonError<T>) -> BreakwaterError {
    BreakwaterError::Internal {
        message: "circuit state lock poisoned".to_string(),
    }
}

// ============================================================================
// Breaker Registry
// ============================================================================

/// Lazily creates and shares one breaker per dependency
///
/// All breakers share the registry's tuning, store, and metrics sink.
pub struct BreakerRegistry {
    defaults: BreakerDefaults,
    breakers: RwLock<HashMap<DependencyName, Arc<DependencyBreaker>>>,
    store: Arc<dyn ResilienceStore>,
    metrics: Arc<dyn ResilienceMetrics>,
}

impl BreakerRegistry {
    /// Create a registry with shared tuning
    pub fn new(
        defaults: BreakerDefaults,
        store: Arc<dyn ResilienceStore>,
        metrics: Arc<dyn ResilienceMetrics>,
    ) -> Self {
        Self {
            defaults,
            breakers: RwLock::new(HashMap::new()),
            store,
            metrics,
        }
    }

    /// Get or create the breaker for a dependency
    pub fn breaker_for(&self, dependency: &DependencyName) -> Arc<DependencyBreaker> {
        if let Ok(map) = self.breakers.read() {
            if let Some(breaker) = map.get(dependency) {
                return Arc::clone(breaker);
            }
        }

        let mut map = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(breaker) = map.get(dependency) {
            return Arc::clone(breaker);
        }

        debug!(dependency = %dependency, "Creating circuit breaker");
        let config = CircuitBreakerConfig::from_defaults(dependency.clone(), &self.defaults);
        let breaker = Arc::new(DependencyBreaker::new(
            config,
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
        ));
        map.insert(dependency.clone(), Arc::clone(&breaker));
        breaker
    }

    /// Get the breaker for a dependency without creating one
    pub fn lookup(&self, dependency: &DependencyName) -> Option<Arc<DependencyBreaker>> {
        self.breakers
            .read()
            .ok()
            .and_then(|map| map.get(dependency).map(Arc::clone))
    }

    /// Dependencies with a live breaker
    pub fn dependencies(&self) -> Vec<DependencyName> {
        self.breakers
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot every breaker for the admin surface
    pub fn summaries(&self) -> Vec<CircuitSummary> {
        let mut summaries: Vec<CircuitSummary> = self
            .breakers
            .read()
            .map(|map| map.values().map(|b| b.summary()).collect())
            .unwrap_or_default();
        summaries.sort_by(|a, b| a.dependency.as_str().cmp(b.dependency.as_str()));
        summaries
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
