//! Retry-capable invocation API.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use switchyard_clustering::{ClusteringConfig, ClusteringResult, TargetSelector};
use switchyard_core::{
    ApplicationFault, CallContext, ConduitInitiator, Endpoint, EndpointProvider, Exchange, Fault,
    Message, Operation, Retryable, TransportMetrics,
};
use switchyard_transport::AsyncConduitFactory;
use tracing::debug;

use crate::config::{ConfigError, SwitchyardConfig};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Body of a 500 response that carries a service fault.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FaultBody {
    code: String,
    message: String,
}

/// Calls operations of one service, failing over between its endpoints.
///
/// Requests are JSON documents `{"operation": .., "params": [..]}` posted to
/// the live endpoint. A 500 response is an application fault; transport
/// failures are retried on alternates by the [`TargetSelector`].
#[derive(Debug)]
pub struct FailoverClient {
    selector: TargetSelector,
    transport: Option<AsyncConduitFactory>,
    me: Weak<FailoverClient>,
}

impl FailoverClient {
    /// Creates a client over any conduit initiator.
    pub fn new(
        endpoint: Endpoint,
        provider: Arc<dyn EndpointProvider>,
        initiator: Arc<dyn ConduitInitiator>,
        clustering: ClusteringConfig,
    ) -> ClusteringResult<Arc<Self>> {
        let selector = TargetSelector::new(endpoint, provider, initiator, clustering)?;
        Ok(Self::with_selector(selector, None))
    }

    /// Creates a client with HTTP conduits as described by `config`.
    pub fn from_config(config: &SwitchyardConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let factory = AsyncConduitFactory::new(config.conduit.clone())?;
        let selector = TargetSelector::new(
            config.service.primary()?,
            Arc::new(config.service.registry()),
            Arc::new(factory.clone()),
            config.clustering.clone(),
        )?;
        debug!(service = %config.service.name, "Created failover client");
        Ok(Self::with_selector(selector, Some(factory)))
    }

    fn with_selector(selector: TargetSelector, transport: Option<AsyncConduitFactory>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            selector,
            transport,
            me: me.clone(),
        })
    }

    /// The selector routing this client's requests.
    pub fn selector(&self) -> &TargetSelector {
        &self.selector
    }

    /// Transport counters, when the client owns its HTTP conduits.
    pub fn transport_metrics(&self) -> Option<TransportMetrics> {
        self.transport.as_ref().map(AsyncConduitFactory::metrics)
    }

    /// Invokes `operation` and returns the response message.
    ///
    /// One-way operations return an empty message.
    pub fn call(
        &self,
        operation: Operation,
        params: Vec<serde_json::Value>,
    ) -> Result<Message, Fault> {
        self.call_with_context(operation, params, CallContext::new())
    }

    /// Like [`FailoverClient::call`] with an explicit request context.
    pub fn call_with_context(
        &self,
        operation: Operation,
        params: Vec<serde_json::Value>,
        context: CallContext,
    ) -> Result<Message, Fault> {
        let mut exchange = Exchange::default();
        self.invoke(&operation, &params, &context, &mut exchange)?;
        Ok(exchange.in_message.take().unwrap_or_default())
    }

    /// Invokes `operation` and decodes the JSON response body.
    pub fn call_json<T: DeserializeOwned>(
        &self,
        operation: Operation,
        params: Vec<serde_json::Value>,
    ) -> Result<T, Fault> {
        let response = self.call(operation, params)?;
        serde_json::from_slice(&response.payload).map_err(Fault::new)
    }

    fn encode(operation: &Operation, params: &[serde_json::Value]) -> Result<Bytes, Fault> {
        let body = serde_json::json!({
            "operation": operation.name.as_ref(),
            "params": params,
        });
        serde_json::to_vec(&body).map(Bytes::from).map_err(Fault::new)
    }

    fn application_fault(response: Option<&Message>) -> ApplicationFault {
        let payload = response.map(|m| m.payload.as_ref()).unwrap_or_default();
        match serde_json::from_slice::<FaultBody>(payload) {
            Ok(body) if !body.code.is_empty() => ApplicationFault::new(body.code, body.message),
            _ => ApplicationFault::new("Server", String::from_utf8_lossy(payload)),
        }
    }
}

impl Retryable for FailoverClient {
    fn invoke(
        &self,
        operation: &Operation,
        params: &[serde_json::Value],
        context: &CallContext,
        exchange: &mut Exchange,
    ) -> Result<(), Fault> {
        exchange.endpoint = Some(self.selector.endpoint());
        exchange.operation = Some(operation.clone());
        exchange.synchronous = !operation.one_way;
        exchange.retryable = self.me.upgrade().map(|me| me as Arc<dyn Retryable>);

        let message = &mut exchange.out_message;
        message.content_type = Some(JSON_CONTENT_TYPE.to_string());
        message.payload = Self::encode(operation, params)?;
        message.params = Some(params.to_vec());
        message.context = context.clone();

        self.selector.prepare(exchange);
        match self.selector.select_conduit(&exchange.out_message) {
            Ok(conduit) => {
                if let Err(err) = conduit.send(exchange) {
                    exchange.out_message.fault = Some(err.into());
                } else if exchange.response_code == Some(500) {
                    let fault = Self::application_fault(exchange.in_message.as_ref());
                    exchange.out_message.fault = Some(fault.into());
                }
            }
            Err(err) => exchange.out_message.fault = Some(Fault::new(err)),
        }
        self.selector.complete(exchange);

        match exchange.effective_fault() {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }
}
