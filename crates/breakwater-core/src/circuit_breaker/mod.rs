//! # Circuit Breaker
//!
//! Per-dependency circuit breaker protecting callers from a failing
//! object-storage dependency.
//!
//! ## State Machine
//!
//! ```text
//! CLOSED --failure_threshold consecutive failures--> OPEN
//! OPEN --recovery_timeout_ms elapsed, next call--> HALF_OPEN
//! HALF_OPEN --success_threshold successes--> CLOSED
//! HALF_OPEN --any failure--> OPEN (recovery timer restarts)
//! ```
//!
//! Every transition is appended to the breaker event log and written
//! through to the dependency's service-status row, so restarted or
//! parallel deployments observe the same circuit state.

use crate::{DependencyName, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod breaker;

pub use breaker::{BreakerRegistry, DependencyBreaker};

// ============================================================================
// Circuit State
// ============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls flow through
    Closed,
    /// Failing fast, calls rejected without reaching the dependency
    Open,
    /// Probing recovery with a bounded number of trial calls
    HalfOpen,
}

impl CircuitState {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Check if calls are allowed to reach the dependency
    pub fn allows_calls(&self) -> bool {
        matches!(self, Self::Closed | Self::HalfOpen)
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What caused a circuit state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Consecutive failures reached the configured threshold
    FailureThreshold,
    /// Recovery timeout elapsed and a call became the trial
    RecoveryTimeout,
    /// A trial call failed while half-open
    TrialFailure,
    /// Enough trial calls succeeded while half-open
    RecoverySuccesses,
    /// Operator reset through the admin surface
    ManualReset,
    /// Degraded-mode entry forced the circuit open
    ForcedOpen,
    /// Monitor confirmed recovery and cleared the circuit
    RecoveryConfirmed,
}

impl TransitionReason {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailureThreshold => "failure_threshold",
            Self::RecoveryTimeout => "recovery_timeout",
            Self::TrialFailure => "trial_failure",
            Self::RecoverySuccesses => "recovery_successes",
            Self::ManualReset => "manual_reset",
            Self::ForcedOpen => "forced_open",
            Self::RecoveryConfirmed => "recovery_confirmed",
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning shared by every breaker the registry creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerDefaults {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before allowing a trial call
    pub recovery_timeout_ms: u64,

    /// Latency at or above which a successful call counts as slow
    pub slow_call_threshold_ms: u64,

    /// Deadline applied to every guarded call
    pub operation_timeout_ms: u64,

    /// Trial successes required to close from half-open
    pub success_threshold: u32,

    /// Concurrent trial calls allowed while half-open
    pub half_open_max_probes: u32,
}

impl BreakerDefaults {
    /// Validate field ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::OutOfRange {
                field: "failure_threshold".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.success_threshold == 0 {
            return Err(ValidationError::OutOfRange {
                field: "success_threshold".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.half_open_max_probes == 0 {
            return Err(ValidationError::OutOfRange {
                field: "half_open_max_probes".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.recovery_timeout_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "recovery_timeout_ms".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        if self.operation_timeout_ms == 0 {
            return Err(ValidationError::OutOfRange {
                field: "operation_timeout_ms".to_string(),
                min: 1,
                max: i64::MAX,
            });
        }
        Ok(())
    }
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            slow_call_threshold_ms: 2_000,
            operation_timeout_ms: 10_000,
            success_threshold: 3,
            half_open_max_probes: 3,
        }
    }
}

/// Configuration for one dependency's breaker
///
/// Immutable for the breaker's lifetime; retuning means building a new
/// breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Dependency this breaker guards
    pub dependency: DependencyName,

    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before allowing a trial call
    pub recovery_timeout_ms: u64,

    /// Latency at or above which a successful call counts as slow
    ///
    /// Slow calls feed metrics and alerts; they never open the circuit.
    pub slow_call_threshold_ms: u64,

    /// Deadline applied to every guarded call
    pub operation_timeout_ms: u64,

    /// Trial successes required to close from half-open
    pub success_threshold: u32,

    /// Concurrent trial calls allowed while half-open
    pub half_open_max_probes: u32,
}

impl CircuitBreakerConfig {
    /// Create a config for a dependency with default tuning
    pub fn for_dependency(dependency: DependencyName) -> Self {
        Self::from_defaults(dependency, &BreakerDefaults::default())
    }

    /// Create a config for a dependency from shared tuning
    pub fn from_defaults(dependency: DependencyName, defaults: &BreakerDefaults) -> Self {
        Self {
            dependency,
            failure_threshold: defaults.failure_threshold,
            recovery_timeout_ms: defaults.recovery_timeout_ms,
            slow_call_threshold_ms: defaults.slow_call_threshold_ms,
            operation_timeout_ms: defaults.operation_timeout_ms,
            success_threshold: defaults.success_threshold,
            half_open_max_probes: defaults.half_open_max_probes,
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Smoothing factor for the latency exponential moving average
pub const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Point-in-time breaker statistics
///
/// Serialized into breaker events and the status row's metrics column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    /// State at snapshot time
    pub state: CircuitState,

    /// Calls that reached a decision (excludes rejections)
    pub total_calls: u64,

    /// Calls that completed successfully
    pub successful_calls: u64,

    /// Calls that failed or timed out
    pub failed_calls: u64,

    /// Successful calls at or above the slow-call threshold
    pub slow_calls: u64,

    /// Calls rejected while open or trial-capped
    pub rejected_calls: u64,

    /// Consecutive failures in the current window
    pub consecutive_failures: u32,

    /// Latency exponential moving average (alpha 0.1)
    pub average_response_time_ms: f64,

    /// When the most recent failure completed
    pub last_failure_at: Option<Timestamp>,

    /// When the most recent success completed
    pub last_success_at: Option<Timestamp>,

    /// When the state last changed
    pub last_state_change: Timestamp,

    /// When an open circuit will allow a trial call
    pub next_attempt_at: Option<Timestamp>,
}

impl BreakerMetrics {
    /// Fraction of decided calls that failed
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }

    /// Fail-safe snapshot reported when breaker state is unreadable
    pub(crate) fn unavailable() -> Self {
        Self {
            state: CircuitState::Open,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            slow_calls: 0,
            rejected_calls: 0,
            consecutive_failures: 0,
            average_response_time_ms: 0.0,
            last_failure_at: None,
            last_success_at: None,
            last_state_change: Timestamp::now(),
            next_attempt_at: None,
        }
    }
}

/// Breaker snapshot exposed over the admin surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSummary {
    /// Dependency the breaker guards
    pub dependency: DependencyName,

    /// Current state
    pub state: CircuitState,

    /// Current statistics
    pub metrics: BreakerMetrics,

    /// Failure threshold in effect
    pub failure_threshold: u32,

    /// Recovery timeout in effect
    pub recovery_timeout_ms: u64,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by a guarded call
///
/// Distinguishes "the breaker refused to ask" from "the dependency
/// answered with an error"; callers route fallbacks differently for the
/// two cases.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the dependency was never invoked
    #[error("Circuit open; retrying allowed in {retry_after_ms:?}ms")]
    CircuitOpen { retry_after_ms: Option<u64> },

    /// Call exceeded the operation deadline
    #[error("Operation timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The dependency returned an error
    #[error("Dependency call failed: {0}")]
    OperationFailed(E),

    /// Half-open trial slots are exhausted; the dependency was never invoked
    #[error("Too many concurrent trial calls")]
    TooManyTrialCalls,

    /// Breaker bookkeeping failed
    #[error("Circuit breaker internal error: {message}")]
    Internal { message: String },
}

impl<E> CircuitBreakerError<E> {
    /// Check if the error counts as a dependency failure
    ///
    /// Rejections do not: the dependency was never asked, so they must
    /// not feed the failure threshold.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::OperationFailed(_) | Self::Timeout { .. })
    }

    /// Check if the breaker rejected the call without invoking the dependency
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::TooManyTrialCalls)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
