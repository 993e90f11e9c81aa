//! Replay of claimed operations against the guarded dependency.

use crate::circuit_breaker::{BreakerRegistry, CircuitBreakerError};
use crate::object_store::{ObjectStore, ObjectStoreError, PutOptions};
use crate::persistence::{OperationPayload, QueuedOperation};
use crate::DependencyName;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Executor Trait
// ============================================================================

/// Why a replay attempt failed
///
/// The transient/permanent split decides retry behavior: transient
/// failures reschedule with backoff, permanent ones mark the operation
/// failed on the spot without burning the remaining retry budget.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Dependency trouble that a later attempt may clear
    #[error("Transient execution failure: {message}")]
    Transient { message: String },

    /// Failure no retry will fix
    #[error("Permanent execution failure: {message}")]
    Permanent { message: String },
}

impl ExecutionError {
    /// Transient failure with a message
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Permanent failure with a message
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Check if a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Executes one claimed operation against its dependency
///
/// Implementations must be idempotent per operation id: the reaper can
/// hand a crashed drainer's claim to another drainer, so the same
/// operation may execute more than once.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Replay one operation
    async fn execute(&self, operation: &QueuedOperation) -> Result<(), ExecutionError>;
}

// ============================================================================
// Storage Executor
// ============================================================================

/// Replays queued payloads against object stores through their breakers
///
/// Replay traffic flows through the same per-dependency breaker as live
/// traffic, so a drain pass against a still-broken dependency is
/// rejected cheaply instead of hammering it.
pub struct StorageOperationExecutor {
    registry: Arc<BreakerRegistry>,
    stores: HashMap<DependencyName, Arc<dyn ObjectStore>>,
}

impl StorageOperationExecutor {
    /// Create an executor with no registered stores
    pub fn new(registry: Arc<BreakerRegistry>) -> Self {
        Self {
            registry,
            stores: HashMap::new(),
        }
    }

    /// Register the object store replays for a dependency go to
    pub fn with_store(
        mut self,
        dependency: DependencyName,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        self.stores.insert(dependency, store);
        self
    }
}

#[async_trait]
impl OperationExecutor for StorageOperationExecutor {
    async fn execute(&self, operation: &QueuedOperation) -> Result<(), ExecutionError> {
        let Some(store) = self.stores.get(&operation.dependency) else {
            return Err(ExecutionError::permanent(format!(
                "no object store registered for dependency {}",
                operation.dependency
            )));
        };
        let breaker = self.registry.breaker_for(&operation.dependency);

        let result = match &operation.payload {
            OperationPayload::StoreObject {
                key,
                content_type,
                data,
            } => {
                let options = PutOptions {
                    content_type: content_type.clone(),
                    metadata: HashMap::new(),
                };
                breaker
                    .execute(|| async {
                        store.put(key, data.clone(), options).await?;
                        Ok::<_, ObjectStoreError>(())
                    })
                    .await
            }
            OperationPayload::DeleteObject { key } => {
                breaker
                    .execute(|| async {
                        store.delete(key).await?;
                        Ok::<_, ObjectStoreError>(())
                    })
                    .await
            }
            OperationPayload::UpdateMetadata { key, metadata } => {
                // Read-modify-write inside one guarded call; the object
                // must still exist for the update to mean anything.
                breaker
                    .execute(|| async {
                        let current = store.get(key).await?;
                        let options = PutOptions {
                            content_type: current.meta.content_type.clone(),
                            metadata: metadata.clone(),
                        };
                        store.put(key, current.data, options).await?;
                        Ok::<_, ObjectStoreError>(())
                    })
                    .await
            }
        };

        result.map_err(classify)
    }
}

impl std::fmt::Debug for StorageOperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageOperationExecutor")
            .field("dependencies", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Map a guarded-call error onto the retry decision
fn classify(error: CircuitBreakerError<ObjectStoreError>) -> ExecutionError {
    match error {
        // The dependency was never asked; try again next drain pass.
        CircuitBreakerError::CircuitOpen { .. } | CircuitBreakerError::TooManyTrialCalls => {
            ExecutionError::transient(error.to_string())
        }
        CircuitBreakerError::Timeout { .. } => ExecutionError::transient(error.to_string()),
        CircuitBreakerError::OperationFailed(inner) => {
            if inner.is_transient() {
                ExecutionError::transient(inner.to_string())
            } else {
                ExecutionError::permanent(inner.to_string())
            }
        }
        CircuitBreakerError::Internal { .. } => ExecutionError::transient(error.to_string()),
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
