//! # Switchyard Core
//!
//! Foundation types shared by the Switchyard transport and clustering crates.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Endpoints**: [`Endpoint`], [`BindingKey`], [`EndpointProvider`], [`StaticServiceRegistry`]
//! - **Exchanges**: [`Exchange`], [`Message`], [`Operation`], [`CallContext`], [`InvocationId`]
//! - **Faults**: [`Fault`], [`ApplicationFault`], [`TransportError`], [`TransportResult`]
//! - **Collaborators**: [`Conduit`], [`ConduitInitiator`], [`Retryable`]
//! - **Config / Metrics**: [`TimeoutConfig`], [`AtomicMetrics`], [`TransportMetrics`]
//!
//! ## Usage
//!
//! A transport implements [`Conduit`] and [`ConduitInitiator`]; a client
//! implements [`Retryable`] so the failover selector can resubmit an
//! invocation against another endpoint:
//!
//! ```rust,ignore
//! use switchyard_core::{Conduit, Endpoint, Exchange, TransportResult};
//!
//! #[derive(Debug)]
//! struct Loopback { target: Endpoint }
//!
//! impl Conduit for Loopback {
//!     fn target(&self) -> &Endpoint { &self.target }
//!     fn send(&self, exchange: &mut Exchange) -> TransportResult<()> { /* ... */ }
//!     fn close(&self) {}
//!     fn is_closed(&self) -> bool { false }
//! }
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

mod conduit;
mod config;
mod endpoint;
mod error;
mod exchange;
mod fault;
mod metrics;

pub use conduit::{Conduit, ConduitInitiator, Retryable};
pub use config::TimeoutConfig;
pub use endpoint::{BindingKey, Endpoint, EndpointProvider, StaticServiceRegistry};
pub use error::{TransportError, TransportResult};
pub use exchange::{CallContext, Exchange, InvocationId, Message, Operation};
pub use fault::{ApplicationFault, Fault};
pub use metrics::{AtomicMetrics, TransportMetrics};
