//! The per-invocation exchange record and its message halves.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conduit::{Conduit, Retryable};
use crate::endpoint::Endpoint;
use crate::fault::Fault;

/// Identity of one logical invocation.
///
/// Minted the first time the invocation is prepared and preserved across
/// [`Exchange::clear`], so every retry of a call resolves to the same
/// invocation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Mints a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Describes the operation being invoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    /// Operation name
    pub name: Arc<str>,
    /// One-way operations expect no response body
    #[serde(default)]
    pub one_way: bool,
}

impl Operation {
    /// A request/response operation.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            one_way: false,
        }
    }

    /// A one-way operation.
    pub fn one_way(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            one_way: true,
        }
    }
}

/// Caller supplied invocation context: request and response property maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallContext {
    /// Properties that travel with the request
    #[serde(default)]
    pub request: HashMap<String, serde_json::Value>,
    /// Properties filled in from the response
    #[serde(default)]
    pub response: HashMap<String, serde_json::Value>,
}

impl CallContext {
    /// Request context key overriding the target address.
    pub const ENDPOINT_ADDRESS: &'static str = "switchyard.endpoint.address";

    /// Request context key naming the address the request was originally aimed at.
    pub const ORIGINAL_ADDRESS: &'static str = "switchyard.endpoint.original_address";

    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address override carried in the request context, if any.
    pub fn endpoint_address(&self) -> Option<&str> {
        self.request
            .get(Self::ENDPOINT_ADDRESS)
            .and_then(serde_json::Value::as_str)
    }

    /// Sets the request context address override.
    pub fn set_endpoint_address(&mut self, address: &str) {
        self.request.insert(
            Self::ENDPOINT_ADDRESS.to_string(),
            serde_json::Value::String(address.to_string()),
        );
    }
}

/// One half (request or response) of an exchange.
#[derive(Clone, Default)]
pub struct Message {
    /// Target address override; wins over the endpoint address
    pub address: Option<String>,
    /// HTTP method; `POST` when unset
    pub http_method: Option<String>,
    /// Content type of the payload
    pub content_type: Option<String>,
    /// Protocol headers, in insertion order
    pub headers: Vec<(String, String)>,
    /// Encoded payload
    pub payload: Bytes,
    /// Marshalled operation parameters; `None` when the message was not
    /// produced by an operation invocation and cannot be replayed
    pub params: Option<Vec<serde_json::Value>>,
    /// Invocation context supplied by the caller
    pub context: CallContext,
    /// Fault recorded on this message
    pub fault: Option<Fault>,
    /// Explicit conduit; wins over the selector's choice
    pub conduit: Option<Arc<dyn Conduit>>,
    /// Per-message async override, also records the decision taken
    pub use_async: Option<bool>,
    /// Free-form properties
    pub properties: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Appends a header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("address", &self.address)
            .field("http_method", &self.http_method)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("payload_len", &self.payload.len())
            .field("params", &self.params.as_ref().map(Vec::len))
            .field("fault", &self.fault)
            .field("conduit", &self.conduit.as_ref().map(|c| c.target().clone()))
            .field("use_async", &self.use_async)
            .finish_non_exhaustive()
    }
}

/// Mutable record of one invocation: where it went, what was sent, what came back.
pub struct Exchange {
    invocation_id: Option<InvocationId>,
    /// Endpoint the exchange is aimed at
    pub endpoint: Option<Endpoint>,
    /// Operation being invoked
    pub operation: Option<Operation>,
    /// Whether the caller waits for the response on its own thread
    pub synchronous: bool,
    /// Outbound (request) message
    pub out_message: Message,
    /// Inbound (response) message once received
    pub in_message: Option<Message>,
    /// Exchange level fault
    pub fault: Option<Fault>,
    /// HTTP status of the response
    pub response_code: Option<u16>,
    /// Set when the endpoint answered that the service is not there
    pub service_not_available: bool,
    /// Ask the conduit to treat 404/503 as "service not available"
    pub complete_if_service_not_available: bool,
    /// Client able to resubmit this invocation
    pub retryable: Option<Arc<dyn Retryable>>,
    /// Set once the invocation reached its final completion
    pub completed: bool,
    /// Free-form properties
    pub properties: HashMap<String, serde_json::Value>,
}

impl Default for Exchange {
    fn default() -> Self {
        Self {
            invocation_id: None,
            endpoint: None,
            operation: None,
            synchronous: true,
            out_message: Message::default(),
            in_message: None,
            fault: None,
            response_code: None,
            service_not_available: false,
            complete_if_service_not_available: false,
            retryable: None,
            completed: false,
            properties: HashMap::new(),
        }
    }
}

impl Exchange {
    /// Creates an exchange for `operation` against `endpoint`.
    pub fn new(endpoint: Endpoint, operation: Operation) -> Self {
        Self {
            endpoint: Some(endpoint),
            operation: Some(operation),
            ..Self::default()
        }
    }

    /// Invocation id, if one has been assigned.
    pub fn invocation_id(&self) -> Option<InvocationId> {
        self.invocation_id
    }

    /// Returns the invocation id, minting one on first use.
    pub fn ensure_invocation_id(&mut self) -> InvocationId {
        *self.invocation_id.get_or_insert_with(InvocationId::new)
    }

    /// The fault that best describes how this exchange failed.
    ///
    /// The outbound message fault wins over the exchange fault.
    pub fn effective_fault(&self) -> Option<&Fault> {
        self.out_message.fault.as_ref().or(self.fault.as_ref())
    }

    /// Purges all state except the invocation id.
    pub fn clear(&mut self) {
        let invocation_id = self.invocation_id;
        *self = Self {
            invocation_id,
            ..Self::default()
        };
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("invocation_id", &self.invocation_id)
            .field("endpoint", &self.endpoint)
            .field("operation", &self.operation)
            .field("synchronous", &self.synchronous)
            .field("out_message", &self.out_message)
            .field("in_message", &self.in_message)
            .field("fault", &self.fault)
            .field("response_code", &self.response_code)
            .field("service_not_available", &self.service_not_available)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}
