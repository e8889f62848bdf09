//! Client configuration loading.
//!
//! A [`SwitchyardConfig`] is read from a TOML, YAML or JSON file, with
//! environment variables layered on top. Variables use the `SWITCHYARD`
//! prefix and `__` between path segments, e.g.
//! `SWITCHYARD__CONDUIT__MAX_RETRANSMITS=2` or
//! `SWITCHYARD__CLUSTERING__STRATEGY=random`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use switchyard_clustering::{ClusteringConfig, ClusteringError};
use switchyard_core::{BindingKey, Endpoint, StaticServiceRegistry, TransportError};
use switchyard_transport::ConduitConfig;

use crate::telemetry::TelemetryConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SWITCHYARD";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The service section is unusable
    #[error("Invalid service configuration: {0}")]
    InvalidService(String),

    /// Transport settings are inconsistent
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Failover settings are inconsistent
    #[error(transparent)]
    Clustering(#[from] ClusteringError),
}

/// One address of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint name, unique within the service
    pub name: String,
    /// Endpoint URL
    pub address: String,
}

/// The service a client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,
    /// Binding key shared by all endpoints
    pub binding: String,
    /// Endpoints in preference order; the first is the primary
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "service".to_string(),
            binding: "json".to_string(),
            endpoints: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Configured endpoints as [`Endpoint`]s.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let binding = BindingKey::new(self.binding.as_str());
        self.endpoints
            .iter()
            .map(|e| Endpoint::new(e.name.as_str(), e.address.as_str(), binding.clone()))
            .collect()
    }

    /// The endpoint requests start on.
    pub fn primary(&self) -> Result<Endpoint, ConfigError> {
        self.endpoints().into_iter().next().ok_or_else(|| {
            ConfigError::InvalidService(format!("service {} has no endpoints", self.name))
        })
    }

    /// In-memory registry of the configured endpoints.
    pub fn registry(&self) -> StaticServiceRegistry {
        StaticServiceRegistry::new(self.name.as_str(), self.endpoints())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::InvalidService(format!(
                "service {} has no endpoints",
                self.name
            )));
        }
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if endpoint.address.trim().is_empty() {
                return Err(ConfigError::InvalidService(format!(
                    "endpoint {} has an empty address",
                    endpoint.name
                )));
            }
            if self.endpoints[..i].iter().any(|e| e.name == endpoint.name) {
                return Err(ConfigError::InvalidService(format!(
                    "duplicate endpoint name {}",
                    endpoint.name
                )));
            }
        }
        Ok(())
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    /// Target service
    pub service: ServiceConfig,
    /// HTTP conduit settings
    pub conduit: ConduitConfig,
    /// Failover settings
    pub clustering: ClusteringConfig,
    /// Logging settings
    pub telemetry: TelemetryConfig,
}

impl SwitchyardConfig {
    /// Loads configuration from a file, with `SWITCHYARD__*` environment
    /// overrides.
    ///
    /// The format follows the extension: `.toml`, `.yaml`/`.yml` or `.json`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use switchyard::SwitchyardConfig;
    ///
    /// let config = SwitchyardConfig::from_file("switchyard.toml").expect("Failed to load config");
    /// ```
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`SwitchyardConfig::from_file`] with a custom environment prefix.
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };
        let name = path.to_str().ok_or(ConfigError::UnsupportedFormat)?;

        let config = Config::builder()
            .add_source(File::new(name, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;
        self.conduit.validate()?;
        self.clustering.validate()?;
        Ok(())
    }
}
