//! Metrics abstraction for resilience instrumentation.
//!
//! Core components record what happened through [`ResilienceMetrics`];
//! the exporter behind it is chosen at the composition root. The API
//! crate provides a Prometheus-backed implementation, and [`NoOpMetrics`]
//! keeps tests and embedded uses free of an exporter.

use crate::circuit_breaker::CircuitState;
use crate::health::{HealthStatus, ProbeKind};
use crate::DependencyName;

/// How a guarded call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Completed within the slow-call threshold
    Success,
    /// Completed successfully but at or above the slow-call threshold
    Slow,
    /// The dependency returned an error
    Failure,
    /// The call exceeded its deadline
    Timeout,
}

impl CallOutcome {
    /// Label value for counters
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Slow => "slow",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

/// How a drained queue operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Replayed against the dependency successfully
    Completed,
    /// Failed and rescheduled with backoff
    Retried,
    /// Retry budget exhausted
    Failed,
    /// Cancelled through the admin surface
    Cancelled,
}

impl OperationOutcome {
    /// Label value for counters
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Retried => "retried",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Sink for resilience instrumentation
///
/// Implementations must be cheap and infallible; they are called on
/// every guarded call and every probe.
pub trait ResilienceMetrics: Send + Sync {
    /// Record the current circuit state for a dependency
    fn record_breaker_state(&self, dependency: &DependencyName, state: CircuitState);

    /// Record a circuit state transition
    fn record_breaker_transition(
        &self,
        dependency: &DependencyName,
        from: CircuitState,
        to: CircuitState,
    );

    /// Record a guarded call that reached a decision
    fn record_call(&self, dependency: &DependencyName, outcome: CallOutcome, elapsed_ms: u64);

    /// Record a call the breaker rejected without invoking the dependency
    fn record_rejected_call(&self, dependency: &DependencyName);

    /// Record a synthetic probe result
    fn record_probe_result(
        &self,
        dependency: &DependencyName,
        probe: ProbeKind,
        status: HealthStatus,
    );

    /// Record queue depth after a queue mutation
    fn record_queue_depth(&self, pending: u64, processing: u64);

    /// Record an operation accepted into the queue
    fn record_operation_enqueued(&self, dependency: &DependencyName);

    /// Record how a drained operation ended
    fn record_operation_outcome(&self, dependency: &DependencyName, outcome: OperationOutcome);

    /// Record entering or leaving global degraded mode
    fn record_degraded_mode(&self, active: bool);
}

/// Metrics sink that records nothing
#[derive(Debug, Default, Clone)]
pub struct NoOpMetrics;

impl ResilienceMetrics for NoOpMetrics {
    fn record_breaker_state(&self, _dependency: &DependencyName, _state: CircuitState) {}

    fn record_breaker_transition(
        &self,
        _dependency: &DependencyName,
        _from: CircuitState,
        _to: CircuitState,
    ) {
    }

    fn record_call(&self, _dependency: &DependencyName, _outcome: CallOutcome, _elapsed_ms: u64) {}

    fn record_rejected_call(&self, _dependency: &DependencyName) {}

    fn record_probe_result(
        &self,
        _dependency: &DependencyName,
        _probe: ProbeKind,
        _status: HealthStatus,
    ) {
    }

    fn record_queue_depth(&self, _pending: u64, _processing: u64) {}

    fn record_operation_enqueued(&self, _dependency: &DependencyName) {}

    fn record_operation_outcome(&self, _dependency: &DependencyName, _outcome: OperationOutcome) {}

    fn record_degraded_mode(&self, _active: bool) {}
}
