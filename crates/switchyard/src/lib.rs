//! # Switchyard
//!
//! Client-side failover over a reactor-bridged HTTP transport.
//!
//! This crate ties the pieces together:
//!
//! - [`switchyard_core`]: endpoints, exchanges, faults and the collaborator
//!   traits
//! - [`switchyard_transport`]: the
//!   [`AsyncConduit`](switchyard_transport::AsyncConduit) and the shared
//!   buffers bridging blocking callers onto tokio
//! - [`switchyard_clustering`]: the
//!   [`TargetSelector`](switchyard_clustering::TargetSelector) and failover
//!   strategies
//!
//! A [`FailoverClient`] built from a [`SwitchyardConfig`] is usually all an
//! application needs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use switchyard::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SwitchyardConfig::from_file("switchyard.toml")?;
//! let _telemetry = config.telemetry.clone().init()?;
//!
//! let client = FailoverClient::from_config(&config)?;
//! let greeting: String = client.call_json(Operation::new("greet"), vec!["ada".into()])?;
//! println!("{greeting}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [service]
//! name = "greeter"
//! binding = "json"
//! endpoints = [
//!     { name = "primary", address = "http://10.0.0.1:8080/greeter" },
//!     { name = "backup", address = "http://10.0.0.2:8080/greeter" },
//! ]
//!
//! [conduit]
//! use_async = "async_only"
//!
//! [clustering]
//! strategy = "retry_on_same_address"
//! max_retries = 2
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod client;
pub mod config;
pub mod telemetry;

pub use client::FailoverClient;
pub use config::{ConfigError, EndpointConfig, ServiceConfig, SwitchyardConfig};
pub use telemetry::{TelemetryConfig, TelemetryError, TelemetryGuard};

pub use switchyard_clustering;
pub use switchyard_core;
pub use switchyard_transport;

/// Common imports.
pub mod prelude {
    pub use crate::client::FailoverClient;
    pub use crate::config::{ConfigError, SwitchyardConfig};
    pub use crate::telemetry::{TelemetryConfig, TelemetryGuard};
    pub use switchyard_clustering::{
        CircuitBreakerConfig, ClusteringConfig, FailoverStrategy, StrategyKind, TargetSelector,
    };
    pub use switchyard_core::{
        ApplicationFault, BindingKey, CallContext, Endpoint, Exchange, Fault, Message, Operation,
        StaticServiceRegistry, TransportError,
    };
    pub use switchyard_transport::{AsyncConduitFactory, ConduitConfig, UseAsyncPolicy};
}
