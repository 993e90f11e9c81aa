//! Prometheus-backed implementation of the core metrics sink.
//!
//! Each [`ServiceMetrics`] instance owns its own [`Registry`], so the
//! exporter never collides with another instance in the same process.
//! The `/metrics` endpoint renders the registry in text format.

use breakwater_core::{
    CallOutcome, CircuitState, DependencyName, HealthStatus, OperationOutcome, ProbeKind,
    ResilienceMetrics,
};
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Gauge encoding of a circuit state
fn state_value(state: CircuitState) -> i64 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    }
}

/// Prometheus metrics for the resilience subsystem
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // HTTP surface
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: Histogram,

    // Circuit breakers
    pub breaker_state: IntGaugeVec,
    pub breaker_transitions_total: IntCounterVec,
    pub guarded_calls_total: IntCounterVec,
    pub call_duration_seconds: HistogramVec,
    pub rejected_calls_total: IntCounterVec,

    // Synthetic probes
    pub probe_results_total: IntCounterVec,

    // Operation queue
    pub queue_pending: IntGauge,
    pub queue_processing: IntGauge,
    pub operations_enqueued_total: IntCounterVec,
    pub operation_outcomes_total: IntCounterVec,

    // Degradation
    pub degraded_mode_active: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("breakwater_http_requests_total", "HTTP requests served"),
            &["method", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "breakwater_http_request_duration_seconds",
                "HTTP request processing time",
            )
            .buckets(vec![0.001, 0.01, 0.1, 1.0, 10.0]),
        )?;
        registry.register(Box::new(http_request_duration.clone()))?;

        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "breakwater_circuit_state",
                "Circuit state per dependency (0 closed, 1 open, 2 half-open)",
            ),
            &["dependency"],
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        let breaker_transitions_total = IntCounterVec::new(
            Opts::new(
                "breakwater_circuit_transitions_total",
                "Circuit state transitions",
            ),
            &["dependency", "from", "to"],
        )?;
        registry.register(Box::new(breaker_transitions_total.clone()))?;

        let guarded_calls_total = IntCounterVec::new(
            Opts::new(
                "breakwater_guarded_calls_total",
                "Guarded calls that reached a decision",
            ),
            &["dependency", "outcome"],
        )?;
        registry.register(Box::new(guarded_calls_total.clone()))?;

        let call_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "breakwater_call_duration_seconds",
                "Latency of guarded calls",
            )
            .buckets(vec![0.005, 0.025, 0.1, 0.5, 2.0, 10.0]),
            &["dependency"],
        )?;
        registry.register(Box::new(call_duration_seconds.clone()))?;

        let rejected_calls_total = IntCounterVec::new(
            Opts::new(
                "breakwater_rejected_calls_total",
                "Calls rejected without invoking the dependency",
            ),
            &["dependency"],
        )?;
        registry.register(Box::new(rejected_calls_total.clone()))?;

        let probe_results_total = IntCounterVec::new(
            Opts::new(
                "breakwater_probe_results_total",
                "Synthetic probe results by classification",
            ),
            &["dependency", "probe", "status"],
        )?;
        registry.register(Box::new(probe_results_total.clone()))?;

        let queue_pending = IntGauge::new(
            "breakwater_queue_pending_operations",
            "Operations waiting for replay",
        )?;
        registry.register(Box::new(queue_pending.clone()))?;

        let queue_processing = IntGauge::new(
            "breakwater_queue_processing_operations",
            "Operations currently being replayed",
        )?;
        registry.register(Box::new(queue_processing.clone()))?;

        let operations_enqueued_total = IntCounterVec::new(
            Opts::new(
                "breakwater_operations_enqueued_total",
                "Operations accepted into the durable queue",
            ),
            &["dependency"],
        )?;
        registry.register(Box::new(operations_enqueued_total.clone()))?;

        let operation_outcomes_total = IntCounterVec::new(
            Opts::new(
                "breakwater_operation_outcomes_total",
                "How drained operations ended",
            ),
            &["dependency", "outcome"],
        )?;
        registry.register(Box::new(operation_outcomes_total.clone()))?;

        let degraded_mode_active = IntGauge::new(
            "breakwater_degraded_mode_active",
            "Whether global read-only mode is active",
        )?;
        registry.register(Box::new(degraded_mode_active.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration,
            breaker_state,
            breaker_transitions_total,
            guarded_calls_total,
            call_duration_seconds,
            rejected_calls_total,
            probe_results_total,
            queue_pending,
            queue_processing,
            operations_enqueued_total,
            operation_outcomes_total,
            degraded_mode_active,
        }))
    }

    /// Record one served HTTP request
    pub fn observe_http_request(&self, method: &str, status: u16, elapsed_seconds: f64) {
        self.http_requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
        self.http_request_duration.observe(elapsed_seconds);
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

impl ResilienceMetrics for ServiceMetrics {
    fn record_breaker_state(&self, dependency: &DependencyName, state: CircuitState) {
        self.breaker_state
            .with_label_values(&[dependency.as_str()])
            .set(state_value(state));
    }

    fn record_breaker_transition(
        &self,
        dependency: &DependencyName,
        from: CircuitState,
        to: CircuitState,
    ) {
        self.breaker_transitions_total
            .with_label_values(&[dependency.as_str(), from.as_str(), to.as_str()])
            .inc();
        self.breaker_state
            .with_label_values(&[dependency.as_str()])
            .set(state_value(to));
    }

    fn record_call(&self, dependency: &DependencyName, outcome: CallOutcome, elapsed_ms: u64) {
        self.guarded_calls_total
            .with_label_values(&[dependency.as_str(), outcome.as_str()])
            .inc();
        self.call_duration_seconds
            .with_label_values(&[dependency.as_str()])
            .observe(elapsed_ms as f64 / 1000.0);
    }

    fn record_rejected_call(&self, dependency: &DependencyName) {
        self.rejected_calls_total
            .with_label_values(&[dependency.as_str()])
            .inc();
    }

    fn record_probe_result(
        &self,
        dependency: &DependencyName,
        probe: ProbeKind,
        status: HealthStatus,
    ) {
        self.probe_results_total
            .with_label_values(&[dependency.as_str(), probe.as_str(), status.as_str()])
            .inc();
    }

    fn record_queue_depth(&self, pending: u64, processing: u64) {
        self.queue_pending.set(pending as i64);
        self.queue_processing.set(processing as i64);
    }

    fn record_operation_enqueued(&self, dependency: &DependencyName) {
        self.operations_enqueued_total
            .with_label_values(&[dependency.as_str()])
            .inc();
    }

    fn record_operation_outcome(&self, dependency: &DependencyName, outcome: OperationOutcome) {
        self.operation_outcomes_total
            .with_label_values(&[dependency.as_str(), outcome.as_str()])
            .inc();
    }

    fn record_degraded_mode(&self, active: bool) {
        self.degraded_mode_active.set(if active { 1 } else { 0 });
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
