//! # Switchyard Transport
//!
//! A reactor-bridged HTTP/1.1 conduit for blocking callers.
//!
//! ## Overview
//!
//! - **Buffers**: [`SharedInputBuffer`] and [`SharedOutputBuffer`] move bytes
//!   between caller threads (which block on a condition variable) and reactor
//!   tasks (which are steered through [`IoControl`]).
//! - **Conduit**: [`AsyncConduitFactory`] owns a small tokio runtime and
//!   creates one [`AsyncConduit`] per endpoint. A conduit implements
//!   [`switchyard_core::Conduit`] on top of hyper, with optional rustls TLS.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use switchyard_core::{BindingKey, Conduit, Endpoint, Exchange, Operation};
//! use switchyard_transport::{AsyncConduitFactory, ConduitConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = AsyncConduitFactory::new(ConduitConfig::reactor())?;
//! let endpoint = Endpoint::new("greeter", "http://127.0.0.1:8080/greet", BindingKey::new("json"));
//! let conduit = factory.create_conduit(&endpoint);
//!
//! let mut exchange = Exchange::new(endpoint, Operation::new("greet"));
//! exchange.out_message.payload = "{\"name\":\"ada\"}".into();
//! conduit.send(&mut exchange)?;
//! println!("{:?}", exchange.response_code);
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

pub mod buffer;
pub mod conduit;

pub use buffer::{
    BufferConfig, ConsumeOutcome, IoControl, Produced, ReactorSignal, SharedInputBuffer,
    SharedOutputBuffer,
};
pub use conduit::{
    AsyncConduit, AsyncConduitFactory, AuthorizationPolicy, ConduitConfig, ExecutionMode,
    HttpResponse, RequestStream, ResponseBody, ResponseHead, TLS_SESSION_PROPERTY,
    TlsClientParameters, TlsSessionInfo, UseAsyncPolicy,
};
