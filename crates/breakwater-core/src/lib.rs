//! # Breakwater Core
//!
//! Core domain logic for the breakwater resilience subsystem.
//!
//! Breakwater shields an application from outages of remote object-storage
//! dependencies: a per-dependency circuit breaker, a synthetic health
//! monitor, a degradation handler that toggles a system-wide read-only
//! mode, and a durable operation queue that defers writes until the
//! dependency recovers.
//!
//! ## Architecture
//!
//! The core follows clean architecture principles:
//! - Business logic depends only on trait abstractions
//! - Infrastructure implementations are injected at runtime
//! - The object store and the relational store are abstract collaborators
//!
//! ## Usage
//!
//! ```rust
//! use breakwater_core::{DependencyName, OperationId};
//!
//! let dependency = DependencyName::new("blob-primary").unwrap();
//! let operation_id = OperationId::new();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

/// Standard result type for breakwater operations
pub type BreakwaterResult<T> = Result<T, BreakwaterError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Name of a guarded external dependency (for example `blob-primary`).
///
/// One circuit breaker, one service-status row, and one probe schedule
/// exist per dependency name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyName(String);

impl DependencyName {
    /// Create a new dependency name with validation
    ///
    /// # Validation Rules
    /// - Must be 1-64 characters
    /// - Must contain only alphanumeric characters and hyphens
    /// - Must not start or end with hyphen
    /// - Must not contain consecutive hyphens
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "dependency_name".to_string(),
            });
        }

        if name.len() > 64 {
            return Err(ValidationError::TooLong {
                field: "dependency_name".to_string(),
                max_length: 64,
            });
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::InvalidCharacters {
                field: "dependency_name".to_string(),
                invalid_chars: "non-alphanumeric except hyphens".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "dependency_name".to_string(),
                message: "cannot start/end with hyphen or contain consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DependencyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DependencyName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for a queued operation.
///
/// Uses ULID for lexicographic sorting and global uniqueness. The id
/// doubles as the idempotency key for replaying the operation against
/// the recovered dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(Ulid);

impl OperationId {
    /// Generate a new unique operation ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the operation ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Unique identifier for a service alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertId(Ulid);

impl AlertId {
    /// Generate a new unique alert ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the alert ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AlertId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Unique identifier for a recorded user notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotificationId(Ulid);

impl NotificationId {
    /// Generate a new unique notification ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the notification ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application-defined user identifier for notification intents
///
/// Breakwater never delivers notifications; it records who should be
/// told about degradations and queued-operation outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a new user ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "user_id".to_string(),
            });
        }

        if value.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "user_id".to_string(),
                max_length: 128,
            });
        }

        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "user_id".to_string(),
                invalid_chars: "non-ASCII or whitespace".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Scheduling priority for queued operations
///
/// Range 1-10 where 1 is drained first. Ties break on creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationPriority(u8);

impl OperationPriority {
    /// Highest priority, drained before everything else
    pub const HIGHEST: Self = Self(1);

    /// Default priority for operations that do not specify one
    pub const NORMAL: Self = Self(5);

    /// Lowest priority, drained last
    pub const LOWEST: Self = Self(10);

    /// Create a priority with range validation
    pub fn new(value: u8) -> Result<Self, ValidationError> {
        if !(1..=10).contains(&value) {
            return Err(ValidationError::OutOfRange {
                field: "priority".to_string(),
                min: 1,
                max: 10,
            });
        }
        Ok(Self(value))
    }

    /// Get numeric value
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl Default for OperationPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for OperationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Time and Tracing Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add milliseconds to the timestamp
    pub fn add_millis(&self, millis: u64) -> Self {
        Self(self.0 + chrono::Duration::milliseconds(millis as i64))
    }

    /// Subtract milliseconds from the timestamp
    pub fn sub_millis(&self, millis: u64) -> Self {
        Self(self.0 - chrono::Duration::milliseconds(millis as i64))
    }

    /// Get duration since another timestamp, zero if `other` is later
    pub fn duration_since(&self, other: Self) -> Duration {
        self.0
            .signed_duration_since(other.0)
            .to_std()
            .unwrap_or_default()
    }

    /// Get whole milliseconds elapsed since another timestamp
    pub fn millis_since(&self, other: Self) -> u64 {
        self.duration_since(other).as_millis() as u64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

/// Identifier for tracing a request across component boundaries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

// ============================================================================
// Access Classification
// ============================================================================

/// Whether a guarded call mutates the dependency.
///
/// Write calls are rejected (or queued, when the caller opts in) while
/// the system is in read-only mode; read calls keep flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessClass {
    Read,
    Write,
}

impl AccessClass {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// Check if the call mutates the dependency
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },

    #[error("Field '{field}' must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error type for breakwater operations
#[derive(Debug, thiserror::Error)]
pub enum BreakwaterError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Persistence error: {0}")]
    Store(#[from] persistence::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BreakwaterError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Queue(e) => e.is_transient(),
            Self::Internal { .. } => true,
            Self::Validation(_) => false,
            Self::Parse(_) => false,
            Self::Configuration { .. } => false,
        }
    }

    /// Get error category for monitoring and alerting
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::Parse(_) => ErrorCategory::Permanent,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Store(_) => ErrorCategory::Transient,
            Self::Queue(_) => ErrorCategory::Transient,
            Self::Internal { .. } => ErrorCategory::Transient,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Abstract object-storage interface guarded by the subsystem
pub mod object_store;

/// Persisted record types and the relational store collaborator
pub mod persistence;

/// Per-dependency circuit breaker
pub mod circuit_breaker;

/// Synthetic health probes, aggregates, and alerting
pub mod health;

/// Durable operation queue and drainer
pub mod queue;

/// Degradation orchestration and failover execution
pub mod degradation;

/// Metrics sink abstraction for operational instrumentation
pub mod metrics;

/// Infrastructure adapters for the abstract collaborators
pub mod adapters;

// Re-export key types for convenience
pub use adapters::{FilesystemObjectStore, MemoryObjectStore, MemoryResilienceStore};
pub use circuit_breaker::{
    BreakerDefaults, BreakerMetrics, BreakerRegistry, CircuitBreakerConfig, CircuitBreakerError,
    CircuitState, CircuitSummary, DependencyBreaker, TransitionReason,
};
pub use degradation::{
    DegradationHandler, DegradedOptions, DeferredOperation, FailoverFailure, FailoverOutcome,
    FailoverRequest,
};
pub use health::{
    DependencyPolicy, HealthAggregates, HealthMonitor, HealthStatus, MonitorSettings, ProbeKind,
};
pub use metrics::{CallOutcome, NoOpMetrics, OperationOutcome, ResilienceMetrics};
pub use object_store::{
    compute_checksum, ObjectMeta, ObjectStore, ObjectStoreError, PutOptions, StoredObject,
};
pub use persistence::{
    AlertDraft, AlertFilter, AlertSeverity, AlertType, BreakerEvent, BreakerSnapshot,
    HealthCheckConfig, HealthCheckResult, NotificationKind, OperationPayload, OperationStatus,
    QueueStats, QueuedOperation, ReadOnlyMode, ResilienceStore, ServiceAlert, ServiceStatus,
    ServiceStatusRecord, StoreError, SystemEvent, UserNotification,
};
pub use queue::{
    DrainSummary, EnqueueRequest, ExecutionError, OperationExecutor, OperationQueue, QueueConfig,
    QueueDrainer, QueueError, StorageOperationExecutor,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
