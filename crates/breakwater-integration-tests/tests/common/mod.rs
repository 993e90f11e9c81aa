//! Common test utilities for the breakwater integration tests
//!
//! This module provides:
//! - A fully wired resilience stack over the in-memory adapters
//! - Breaker and queue tuning fast enough for outage episodes to play
//!   out inside a test
//! - Helpers for deferred payloads and for reading back side effects

use breakwater_api::{ApiConfig, AppState, ServiceMetrics};
use breakwater_core::{
    AlertFilter, AlertType, BreakerDefaults, BreakerRegistry, DegradationHandler, DependencyName,
    DependencyPolicy, HealthMonitor, MemoryObjectStore, MemoryResilienceStore, MonitorSettings,
    ObjectStore, OperationPayload, OperationQueue, QueueConfig, QueueDrainer, ResilienceMetrics,
    ResilienceStore, ServiceStatusRecord, StorageOperationExecutor, UserId,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

#[allow(dead_code)]
pub const PRIMARY: &str = "blob-primary";

#[allow(dead_code)]
pub const ARCHIVE: &str = "blob-archive";

#[allow(dead_code)]
pub fn dep(name: &str) -> DependencyName {
    name.parse().expect("test dependency name should be valid")
}

#[allow(dead_code)]
pub fn user() -> UserId {
    UserId::new("ops-oncall").expect("test user id should be valid")
}

/// Breaker tuning that trips after two failures and allows a recovery
/// trial 50ms later, so an episode fits inside a test.
#[allow(dead_code)]
pub fn fast_breaker() -> BreakerDefaults {
    BreakerDefaults {
        failure_threshold: 2,
        recovery_timeout_ms: 50,
        success_threshold: 1,
        half_open_max_probes: 1,
        ..BreakerDefaults::default()
    }
}

/// Queue tuning with short backoff and claim timeouts.
#[allow(dead_code)]
pub fn fast_queue() -> QueueConfig {
    QueueConfig {
        drain_interval_ms: 20,
        reaper_interval_ms: 20,
        backoff_base_ms: 10,
        max_backoff_ms: 40,
        stuck_claim_timeout_ms: 50,
        ..QueueConfig::default()
    }
}

/// One wired resilience stack over in-memory adapters.
///
/// The components share the same store, breaker registry, and metrics,
/// exactly as the service binary wires them.
#[allow(dead_code)]
pub struct Stack {
    pub store: Arc<MemoryResilienceStore>,
    pub metrics: Arc<ServiceMetrics>,
    pub registry: Arc<BreakerRegistry>,
    pub queue: Arc<OperationQueue>,
    pub drainer: QueueDrainer,
    pub degradation: Arc<DegradationHandler>,
    pub monitor: Arc<HealthMonitor>,
    pub objects: HashMap<DependencyName, Arc<MemoryObjectStore>>,
}

#[allow(dead_code)]
impl Stack {
    /// The injectable object store behind one dependency.
    pub fn objects_for(&self, name: &str) -> Arc<MemoryObjectStore> {
        Arc::clone(
            self.objects
                .get(&dep(name))
                .expect("dependency should be part of the stack"),
        )
    }

    /// Application state for driving the admin router over this stack.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            ApiConfig::default(),
            Arc::clone(&self.store) as Arc<dyn ResilienceStore>,
            Arc::clone(&self.registry),
            Arc::clone(&self.monitor),
            Arc::clone(&self.queue),
            Arc::clone(&self.metrics),
        )
    }

    /// Alert types currently active, in insertion order.
    pub async fn active_alert_types(&self) -> Vec<AlertType> {
        self.store
            .alerts(AlertFilter {
                active_only: true,
                ..Default::default()
            })
            .await
            .expect("alert listing should succeed")
            .iter()
            .map(|alert| alert.alert_type)
            .collect()
    }
}

/// Build a stack with the fast tuning over the given dependencies.
#[allow(dead_code)]
pub async fn stack(dependencies: &[&str]) -> Stack {
    stack_tuned(dependencies, fast_breaker(), fast_queue()).await
}

/// Build a stack with explicit breaker and queue tuning.
#[allow(dead_code)]
pub async fn stack_tuned(
    dependencies: &[&str],
    breaker: BreakerDefaults,
    queue_config: QueueConfig,
) -> Stack {
    let store = Arc::new(MemoryResilienceStore::new());
    let resilience: Arc<dyn ResilienceStore> = Arc::clone(&store) as Arc<dyn ResilienceStore>;
    let metrics = ServiceMetrics::new().expect("metrics registration should succeed");
    let metrics_sink: Arc<dyn ResilienceMetrics> = Arc::clone(&metrics) as Arc<dyn ResilienceMetrics>;

    let registry = Arc::new(BreakerRegistry::new(
        breaker,
        Arc::clone(&resilience),
        Arc::clone(&metrics_sink),
    ));
    let queue = Arc::new(OperationQueue::new(
        queue_config.clone(),
        Arc::clone(&resilience),
        Arc::clone(&metrics_sink),
    ));
    let degradation = Arc::new(DegradationHandler::new(
        Arc::clone(&resilience),
        Arc::clone(&registry),
        Arc::clone(&queue),
        Arc::clone(&metrics_sink),
    ));

    let mut objects = HashMap::new();
    let mut executor = StorageOperationExecutor::new(Arc::clone(&registry));
    let mut policies = Vec::new();
    for name in dependencies {
        let dependency = dep(name);
        let object_store = Arc::new(MemoryObjectStore::new());
        store
            .init_service_status(ServiceStatusRecord::healthy(dependency.clone()))
            .await
            .expect("status row seeding should succeed");
        executor = executor.with_store(
            dependency.clone(),
            Arc::clone(&object_store) as Arc<dyn ObjectStore>,
        );
        policies.push(DependencyPolicy {
            dependency: dependency.clone(),
            store: Arc::clone(&object_store) as Arc<dyn ObjectStore>,
            read_only_on_outage: true,
            notify: vec![user()],
        });
        objects.insert(dependency, object_store);
    }

    let drainer = QueueDrainer::new(
        queue_config,
        Arc::clone(&resilience),
        Arc::new(executor),
        Arc::clone(&metrics_sink),
    );
    let monitor = Arc::new(HealthMonitor::new(
        resilience,
        Arc::clone(&registry),
        Arc::clone(&degradation),
        metrics_sink,
        policies,
        MonitorSettings::default(),
    ));

    Stack {
        store,
        metrics,
        registry,
        queue,
        drainer,
        degradation,
        monitor,
        objects,
    }
}

/// Payload that stores a small text object under `key`.
#[allow(dead_code)]
pub fn store_payload(key: &str) -> OperationPayload {
    OperationPayload::StoreObject {
        key: key.to_string(),
        content_type: Some("text/plain".to_string()),
        data: Bytes::from_static(b"deferred body"),
    }
}
