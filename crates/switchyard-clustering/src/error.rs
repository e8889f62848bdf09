//! Clustering error types.

use switchyard_core::TransportError;
use thiserror::Error;

/// Result alias for clustering setup.
pub type ClusteringResult<T> = Result<T, ClusteringError>;

/// Errors raised while setting up failover.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ClusteringError {
    /// Inconsistent clustering configuration
    #[error("Invalid clustering configuration: {0}")]
    InvalidConfiguration(String),

    /// No conduit could be created for the live endpoint
    #[error("No conduit for {endpoint}: {source}")]
    ConduitUnavailable {
        /// Endpoint the conduit was requested for
        endpoint: String,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },
}
