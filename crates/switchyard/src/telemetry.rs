//! Tracing subscriber setup.
//!
//! [`TelemetryConfig::init`] installs a global `tracing-subscriber` registry:
//! an [`EnvFilter`] (a set `RUST_LOG` wins over the configured level) and a
//! JSON or compact fmt layer. Keep the returned [`TelemetryGuard`] alive for
//! as long as the application logs.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{
    Registry, filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid configuration
    #[error("Invalid telemetry configuration: {0}")]
    InvalidConfiguration(String),

    /// A global subscriber is already installed
    #[error("Tracing subscriber error: {0}")]
    TracingError(String),
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to the startup record
    pub service_name: String,
    /// Filter directives, e.g. `"info,switchyard_clustering=debug"`
    pub log_level: String,
    /// JSON lines instead of human readable output
    pub json_logs: bool,
    /// Write to stderr instead of stdout
    pub stderr_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "switchyard-client".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            stderr_output: true,
        }
    }
}

impl TelemetryConfig {
    /// Sets the service name.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Sets the filter directives.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Switches JSON output on or off.
    #[must_use]
    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    /// Builds the filter: `RUST_LOG` if set and valid, else `log_level`.
    pub fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .map_err(|e| TelemetryError::InvalidConfiguration(format!("Invalid log level: {e}")))
    }

    /// Installs the global subscriber.
    pub fn init(self) -> Result<TelemetryGuard, TelemetryError> {
        TelemetryGuard::init(self)
    }
}

/// Keeps telemetry alive; logs a shutdown record when dropped.
#[derive(Debug)]
pub struct TelemetryGuard {
    config: TelemetryConfig,
}

impl TelemetryGuard {
    /// Installs the subscriber described by `config`.
    pub fn init(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let env_filter = config.env_filter()?;
        init_subscriber(&config, env_filter)?;
        info!(
            service_name = %config.service_name,
            json_logs = config.json_logs,
            stderr_output = config.stderr_output,
            "Switchyard telemetry initialized"
        );
        Ok(Self { config })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        info!(service_name = %self.config.service_name, "Shutting down Switchyard telemetry");
    }
}

/// Each output combination has its own layer type, hence one branch each.
fn init_subscriber(config: &TelemetryConfig, env_filter: EnvFilter) -> Result<(), TelemetryError> {
    let registry = Registry::default().with(env_filter);
    let result = match (config.json_logs, config.stderr_output) {
        (true, true) => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .json(),
            )
            .try_init(),
        (true, false) => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true).json())
            .try_init(),
        (false, true) => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init(),
        (false, false) => registry
            .with(fmt::layer().with_target(true).with_thread_names(true).compact())
            .try_init(),
    };
    result.map_err(|e| TelemetryError::TracingError(e.to_string()))
}
