//! # Health Monitoring
//!
//! Continuous synthetic probing of each guarded dependency. Probes run
//! through the dependency's production circuit breaker, so monitoring
//! and live traffic share one view of dependency health, and a probe
//! can serve as the half-open trial that drives recovery.
//!
//! Each batch appends probe results to the health history, recomputes
//! rolling aggregates, evaluates alert rules, and crosses into or out
//! of degraded mode through the degradation handler.

use crate::{DependencyName, Timestamp, UserId};
use crate::object_store::ObjectStore;
use crate::persistence::HealthCheckResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod monitor;
mod probes;

pub use monitor::HealthMonitor;

/// Error rate above which a Medium `HighErrorRate` alert is raised
pub const ERROR_RATE_MEDIUM: f64 = 0.2;

/// Error rate above which the `HighErrorRate` alert escalates to High
pub const ERROR_RATE_HIGH: f64 = 0.5;

// ============================================================================
// Probe Kinds and Status
// ============================================================================

/// Synthetic probe operations
///
/// Every probe is side-effect-bounded: writes land under the probe
/// prefix with unique names, and the delete probe cleans up the batch's
/// own object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Put a uniquely named probe object and verify the stored checksum
    Write,
    /// Get a guaranteed-absent key and require not-found semantics
    Read,
    /// Delete the batch's probe object
    Delete,
    /// Bounded list under the probe prefix
    List,
    /// Head the probe object and verify size and checksum
    Metadata,
}

impl ProbeKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classified outcome of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Succeeded within the slow threshold
    Healthy,
    /// Succeeded at or above the slow threshold
    Degraded,
    /// Failed, timed out, or was rejected by the breaker
    Unhealthy,
}

impl HealthStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Check if the probe succeeded at full speed
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a completed probe by latency against the slow threshold
pub fn classify_latency(elapsed_ms: u64, slow_threshold_ms: u64) -> HealthStatus {
    if elapsed_ms >= slow_threshold_ms {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// ============================================================================
// Rolling Aggregates
// ============================================================================

/// Rolling probe aggregates over the configured window
///
/// Serialized into the status row's `health_metrics` column under the
/// `probes` key and exposed over the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAggregates {
    /// Results considered
    pub total_probes: usize,

    /// Probes classified healthy
    pub healthy: usize,

    /// Probes classified degraded
    pub degraded: usize,

    /// Probes classified unhealthy
    pub unhealthy: usize,

    /// Fraction of probes that were unhealthy
    pub error_rate: f64,

    /// Mean probe latency over the window
    pub average_response_time_ms: f64,

    /// Percentage of probes that reached the dependency at all
    pub uptime_percent: f64,

    /// When the aggregates were computed
    pub computed_at: Timestamp,
}

impl HealthAggregates {
    /// Compute aggregates over recent results (already window-bounded)
    pub fn from_results(results: &[HealthCheckResult]) -> Self {
        let total = results.len();
        let healthy = results
            .iter()
            .filter(|r| r.status == HealthStatus::Healthy)
            .count();
        let degraded = results
            .iter()
            .filter(|r| r.status == HealthStatus::Degraded)
            .count();
        let unhealthy = total - healthy - degraded;

        let (error_rate, average_response_time_ms, uptime_percent) = if total == 0 {
            (0.0, 0.0, 100.0)
        } else {
            let latency_sum: u64 = results.iter().map(|r| r.response_time_ms).sum();
            (
                unhealthy as f64 / total as f64,
                latency_sum as f64 / total as f64,
                (healthy + degraded) as f64 / total as f64 * 100.0,
            )
        };

        Self {
            total_probes: total,
            healthy,
            degraded,
            unhealthy,
            error_rate,
            average_response_time_ms,
            uptime_percent,
            computed_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// Monitor Configuration
// ============================================================================

/// What to probe and what to do when a dependency goes bad
///
/// One policy per tracked dependency, fixed at monitor construction.
#[derive(Clone)]
pub struct DependencyPolicy {
    /// Dependency this policy covers
    pub dependency: DependencyName,

    /// Object store the probes exercise
    pub store: Arc<dyn ObjectStore>,

    /// Enter global read-only mode when this dependency degrades
    pub read_only_on_outage: bool,

    /// Users to notify about degradation and recovery
    pub notify: Vec<UserId>,
}

impl DependencyPolicy {
    /// Policy with no read-only escalation and no notification audience
    pub fn new(dependency: DependencyName, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            dependency,
            store,
            read_only_on_outage: false,
            notify: Vec::new(),
        }
    }
}

impl std::fmt::Debug for DependencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyPolicy")
            .field("dependency", &self.dependency)
            .field("read_only_on_outage", &self.read_only_on_outage)
            .field("notify", &self.notify)
            .finish()
    }
}

/// Monitor tuning that does not live in the stored configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Key prefix for probe objects
    pub probe_prefix: String,

    /// Fully healthy batches required before a degraded dependency recovers
    pub recovery_batches: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            probe_prefix: "health-probes/".to_string(),
            recovery_batches: 2,
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
