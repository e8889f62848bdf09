//! Collaborator traits: the transport conduit and the client able to retry.

use std::fmt;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::error::TransportResult;
use crate::exchange::{CallContext, Exchange, Operation};
use crate::fault::Fault;

/// A transport channel to one endpoint.
///
/// `send` performs the whole request/response round trip for the exchange,
/// blocking the calling thread; the response lands in
/// [`Exchange::in_message`] and [`Exchange::response_code`].
pub trait Conduit: Send + Sync + fmt::Debug {
    /// Endpoint this conduit talks to.
    fn target(&self) -> &Endpoint;

    /// Sends the outbound message of `exchange` and reads the response.
    fn send(&self, exchange: &mut Exchange) -> TransportResult<()>;

    /// Final completion hook, called once the invocation is over.
    fn complete(&self, _exchange: &mut Exchange) {}

    /// Releases the conduit. Idempotent.
    fn close(&self);

    /// Whether [`Conduit::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Creates conduits for endpoints.
pub trait ConduitInitiator: Send + Sync + fmt::Debug {
    /// Returns a conduit able to reach `endpoint`.
    fn get_conduit(&self, endpoint: &Endpoint) -> TransportResult<Arc<dyn Conduit>>;
}

/// A client able to resubmit a stored invocation on an existing exchange.
pub trait Retryable: Send + Sync + fmt::Debug {
    /// Runs `operation` again with the stored parameters and context.
    ///
    /// The exchange has been cleared by the caller (only its invocation id is
    /// left) and must be fully repopulated.
    fn invoke(
        &self,
        operation: &Operation,
        params: &[serde_json::Value],
        context: &CallContext,
        exchange: &mut Exchange,
    ) -> Result<(), Fault>;
}
