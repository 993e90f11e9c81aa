//! Service configuration: file and environment layering, validation.
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!
//! 1. `/etc/breakwater/service.yaml` (system-wide defaults)
//! 2. `./config/service.yaml` (deployment-local override)
//! 3. Path given by the `BW_CONFIG_FILE` environment variable
//! 4. Environment variables prefixed `BW__` (double-underscore
//!    separator), e.g. `BW__SERVER__PORT=9090` sets `server.port`
//!
//! Every field carries a default, so an unconfigured environment yields
//! a valid configuration. A malformed file or an uncoercible variable is
//! a hard error: it indicates deliberate-but-broken operator input.

use breakwater_api::{responses::MonitorConfigBody, ApiConfig};
use breakwater_core::{
    BreakerDefaults, DependencyName, MonitorSettings, QueueConfig, UserId,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ApiConfig,

    /// Circuit breaker tuning applied to every dependency
    pub breaker: BreakerDefaults,

    /// Operation queue and drainer tuning
    pub queue: QueueConfig,

    /// Monitor settings outside the stored schedule
    pub monitor: MonitorSettings,

    /// Initial probe schedule seeded into the store at startup
    pub health: MonitorConfigBody,

    /// Object-storage dependencies to guard
    pub dependencies: Vec<DependencyConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ApiConfig::default(),
            breaker: BreakerDefaults::default(),
            queue: QueueConfig::default(),
            monitor: MonitorSettings::default(),
            health: MonitorConfigBody::default(),
            dependencies: vec![DependencyConfig::default()],
        }
    }
}

/// One guarded object-storage dependency
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyConfig {
    /// Dependency name, also the breaker and status-row key
    pub name: String,

    /// Object store backing this dependency
    #[serde(default)]
    pub backend: BackendConfig,

    /// Enter global read-only mode when this dependency degrades
    #[serde(default = "default_read_only_on_outage")]
    pub read_only_on_outage: bool,

    /// Users notified about degradation and recovery
    #[serde(default)]
    pub notify: Vec<String>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            name: "blob-primary".to_string(),
            backend: BackendConfig::Memory,
            read_only_on_outage: true,
            notify: Vec::new(),
        }
    }
}

fn default_read_only_on_outage() -> bool {
    true
}

/// Object store backend selection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory store, for development and tests
    #[default]
    Memory,

    /// Filesystem store rooted at `root`
    Filesystem { root: PathBuf },
}

impl ServiceConfig {
    /// Validate every section, including dependency naming rules
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .validate()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;
        self.breaker
            .validate()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;
        self.queue
            .validate()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;
        self.health
            .clone()
            .into_config()
            .validate()
            .map_err(|e| ConfigError::invalid(e.to_string()))?;

        if self.dependencies.is_empty() {
            return Err(ConfigError::invalid(
                "at least one dependency must be configured",
            ));
        }

        let mut seen = HashSet::new();
        for dependency in &self.dependencies {
            let name: DependencyName = dependency
                .name
                .parse()
                .map_err(|e| ConfigError::invalid(format!("dependency '{}': {e}", dependency.name)))?;
            if !seen.insert(name) {
                return Err(ConfigError::invalid(format!(
                    "dependency '{}' is configured twice",
                    dependency.name
                )));
            }
            for user in &dependency.notify {
                UserId::new(user.clone()).map_err(|e| {
                    ConfigError::invalid(format!(
                        "dependency '{}' notify entry '{user}': {e}",
                        dependency.name
                    ))
                })?;
            }
        }

        Ok(())
    }
}

/// Load the layered configuration from files and the environment
pub fn load() -> Result<ServiceConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/breakwater/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Ok(explicit_path) = std::env::var("BW_CONFIG_FILE") {
        if !explicit_path.is_empty() {
            builder = builder.add_source(
                config::File::with_name(&explicit_path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }
    }

    let settings = builder
        .add_source(config::Environment::with_prefix("BW").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
