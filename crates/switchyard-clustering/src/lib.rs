//! # Switchyard Clustering
//!
//! Client-side failover: when a request fails with a transport error, retry
//! the same invocation against an alternate endpoint of the service.
//!
//! ## Overview
//!
//! - [`TargetSelector`] records each invocation in `prepare`, hands out the
//!   conduit for the live endpoint, and in `complete` decides whether to fail
//!   over. Retries go back through the exchange's
//!   [`Retryable`](switchyard_core::Retryable) client.
//! - [`FailoverStrategy`] decides which endpoint comes next: `Sequential`,
//!   `RetryOnSameAddress` or `Random`. Custom strategies implement
//!   [`Strategy`].
//! - [`CircuitBreakerRegistry`] keeps addresses that keep failing out of the
//!   alternate list for a while.
//!
//! Only I/O-class failures fail over. Application faults, marshalling errors
//! and protocol errors are returned to the caller unchanged, and a retry that
//! fails leaves the original error on the exchange.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchyard_clustering::{ClusteringConfig, TargetSelector};
//! use switchyard_core::{BindingKey, ConduitInitiator, Endpoint, StaticServiceRegistry};
//!
//! # fn build(initiator: Arc<dyn ConduitInitiator>) -> Result<(), Box<dyn std::error::Error>> {
//! let binding = BindingKey::new("json");
//! let primary = Endpoint::new("primary", "http://10.0.0.1:8080/orders", binding.clone());
//! let backup = Endpoint::new("backup", "http://10.0.0.2:8080/orders", binding);
//! let registry = Arc::new(StaticServiceRegistry::new("orders", vec![primary.clone(), backup]));
//!
//! let _selector = TargetSelector::new(
//!     primary,
//!     registry,
//!     initiator,
//!     ClusteringConfig::default().with_retries(1),
//! )?;
//! # Ok(())
//! # }
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

pub mod circuit_breaker;
pub mod config;
pub mod error;
mod invocation;
pub mod metrics;
pub mod selector;
pub mod strategy;

pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use config::{ClusteringConfig, StrategyKind};
pub use error::{ClusteringError, ClusteringResult};
pub use invocation::InvocationContext;
pub use metrics::{FailoverMetrics, FailoverMetricsSnapshot};
pub use selector::TargetSelector;
pub use strategy::{AlternateList, Alternates, FailoverStrategy, RetryOnSameAddress, Strategy};
