//! # Breakwater Service
//!
//! Binary entry point for the Breakwater resilience service.
//!
//! This executable:
//! - Loads configuration from environment and files
//! - Initializes observability (logging, metrics, tracing)
//! - Wires the store, circuit breakers, queue, and health monitor
//! - Starts the admin HTTP server from breakwater-api

mod config;

use crate::config::{BackendConfig, DependencyConfig};
use breakwater_api::{start_server, AppState, ServerError, ServiceMetrics};
use breakwater_core::{
    BreakerRegistry, DegradationHandler, DependencyName, DependencyPolicy, FilesystemObjectStore,
    HealthMonitor, MemoryObjectStore, MemoryResilienceStore, ObjectStore, ObjectStoreError,
    OperationQueue, QueueDrainer, ResilienceMetrics, ResilienceStore, ServiceStatusRecord,
    StorageOperationExecutor, UserId,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "breakwater_service=info,breakwater_api=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Breakwater Service");

    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Layering and defaults live in the config module. Absent files or an
    // entirely unconfigured environment produce a valid configuration with
    // built-in defaults; a malformed file or an environment variable that
    // cannot be coerced to the correct type is a hard error.
    // -------------------------------------------------------------------------
    let service_config = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(
                error = %e,
                "Could not load service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    // -------------------------------------------------------------------------
    // Wire shared collaborators
    //
    // One resilience store backs the status rows, the operation queue, the
    // alerts, and the breaker snapshots. Every configured dependency gets an
    // object store built from its backend section, a seeded healthy status
    // row, a replay target on the executor, and a monitor policy. Breakers
    // themselves are created lazily by the registry on first use.
    // -------------------------------------------------------------------------
    let store: Arc<dyn ResilienceStore> = Arc::new(MemoryResilienceStore::new());

    let metrics = match ServiceMetrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            error!(error = %e, "Failed to register metrics; aborting");
            std::process::exit(3);
        }
    };
    let metrics_sink: Arc<dyn ResilienceMetrics> = metrics.clone();

    let registry = Arc::new(BreakerRegistry::new(
        service_config.breaker.clone(),
        Arc::clone(&store),
        Arc::clone(&metrics_sink),
    ));

    let queue = Arc::new(OperationQueue::new(
        service_config.queue.clone(),
        Arc::clone(&store),
        Arc::clone(&metrics_sink),
    ));

    let mut executor = StorageOperationExecutor::new(Arc::clone(&registry));
    let mut policies = Vec::new();

    for dependency_config in &service_config.dependencies {
        let name: DependencyName = match dependency_config.name.parse() {
            Ok(name) => name,
            Err(e) => {
                error!(
                    dependency = %dependency_config.name,
                    error = %e,
                    "Invalid dependency name in configuration; aborting"
                );
                std::process::exit(3);
            }
        };

        let object_store = match build_object_store(&name, &dependency_config.backend).await {
            Ok(object_store) => object_store,
            Err(e) => {
                error!(
                    dependency = %name,
                    error = %e,
                    "Failed to prepare object store; aborting"
                );
                std::process::exit(3);
            }
        };

        if let Err(e) = store
            .init_service_status(ServiceStatusRecord::healthy(name.clone()))
            .await
        {
            error!(dependency = %name, error = %e, "Failed to seed status row; aborting");
            std::process::exit(3);
        }

        executor = executor.with_store(name.clone(), Arc::clone(&object_store));
        policies.push(build_policy(name, dependency_config, object_store));
    }

    // Seed the probe schedule so the monitor and the admin surface agree on
    // the effective configuration from the first batch onwards.
    let health_config = service_config.health.clone().into_config();
    if let Err(e) = store.put_health_check_config(&health_config).await {
        error!(error = %e, "Failed to store probe schedule; aborting");
        std::process::exit(3);
    }

    let drainer = Arc::new(QueueDrainer::new(
        service_config.queue.clone(),
        Arc::clone(&store),
        Arc::new(executor),
        Arc::clone(&metrics_sink),
    ));

    let degradation = Arc::new(DegradationHandler::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&queue),
        Arc::clone(&metrics_sink),
    ));

    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        degradation,
        Arc::clone(&metrics_sink),
        policies,
        service_config.monitor.clone(),
    ));

    // Background loops log their own schedules on start.
    monitor.start().await;
    drainer.start().await;

    let state = AppState::new(
        service_config.server.clone(),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&monitor),
        Arc::clone(&queue),
        metrics,
    );

    info!(
        host = %state.config.host,
        port = state.config.port,
        "Starting HTTP server"
    );

    // Start the server
    if let Err(e) = start_server(state).await {
        error!("Failed to start server: {}", e);

        let exit_code = match e {
            ServerError::BindFailed { .. } => 1,
            ServerError::ServerFailed { .. } => 2,
            ServerError::Configuration { .. } => 3,
        };

        std::process::exit(exit_code);
    }

    // The server has drained; stop the background loops before exiting.
    monitor.stop().await;
    drainer.stop().await;

    info!("Breakwater Service stopped");

    Ok(())
}

// ============================================================================
// Private helpers
// ============================================================================

/// Build the object store for a configured backend.
///
/// The filesystem backend creates its root directory when missing, so a
/// misconfigured root path fails here rather than on the first write.
async fn build_object_store(
    dependency: &DependencyName,
    backend: &BackendConfig,
) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    match backend {
        BackendConfig::Memory => {
            info!(dependency = %dependency, "Using in-memory object store");
            Ok(Arc::new(MemoryObjectStore::new()))
        }
        BackendConfig::Filesystem { root } => {
            info!(
                dependency = %dependency,
                root = %root.display(),
                "Using filesystem object store"
            );
            let object_store = FilesystemObjectStore::new(root.clone()).await?;
            Ok(Arc::new(object_store))
        }
    }
}

/// Build the monitor policy for one configured dependency.
///
/// Notify entries were validated with the rest of the configuration, so an
/// unparsable entry here is a bug; it is skipped with an error rather than
/// taking the service down.
fn build_policy(
    name: DependencyName,
    dependency_config: &DependencyConfig,
    store: Arc<dyn ObjectStore>,
) -> DependencyPolicy {
    let notify = dependency_config
        .notify
        .iter()
        .filter_map(|user| match UserId::new(user.clone()) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(user = %user, error = %e, "Skipping invalid notify entry");
                None
            }
        })
        .collect();

    DependencyPolicy {
        dependency: name,
        store,
        read_only_on_outage: dependency_config.read_only_on_outage,
        notify,
    }
}
