//! HTTP conduit bridging blocking callers onto the tokio/hyper reactor.

mod config;
mod driver;
mod factory;
mod response;
mod stream;
#[cfg(feature = "tls")]
mod tls;

pub use config::{AuthorizationPolicy, ConduitConfig, TlsClientParameters, UseAsyncPolicy};
pub use factory::AsyncConduitFactory;
pub use response::{HttpResponse, ResponseBody, ResponseHead, TlsSessionInfo};
pub use stream::{ExecutionMode, RequestStream};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use hyper::Method;
use parking_lot::Mutex;
use switchyard_core::{
    Conduit, Endpoint, Exchange, Message, TransportError, TransportResult,
};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use url::Url;

use driver::{ReactorChannels, RequestPlan};
use factory::ConduitContext;

/// Reactor tasks started by one conduit, so `close` can abort them and
/// release any caller blocked on their buffers.
#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    tasks: Mutex<Vec<(AbortHandle, ReactorChannels)>>,
}

impl TaskRegistry {
    pub(crate) fn track(&self, handle: AbortHandle, channels: ReactorChannels) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|(task, _)| !task.is_finished());
        tasks.push((handle, channels));
    }

    fn abort_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut live = 0;
        for (task, channels) in tasks {
            // A finished task has already delivered its whole body
            if !task.is_finished() {
                task.abort();
                channels.cancelled();
                live += 1;
            }
        }
        live
    }
}

/// HTTP/1.1 conduit to one endpoint.
///
/// Requests run either on the factory's reactor, streaming through shared
/// buffers, or on the caller thread, depending on [`UseAsyncPolicy`], the
/// exchange's synchronous flag and the per-message override.
#[derive(Debug)]
pub struct AsyncConduit {
    target: Endpoint,
    ctx: Arc<ConduitContext>,
    tasks: Arc<TaskRegistry>,
    closed: AtomicBool,
}

impl AsyncConduit {
    pub(crate) fn new(target: Endpoint, ctx: Arc<ConduitContext>) -> Self {
        Self {
            target,
            ctx,
            tasks: Arc::new(TaskRegistry::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolves address, method and execution mode for the exchange's
    /// outbound message and returns the stream to write the body into.
    ///
    /// The decision is recorded in [`Message::use_async`].
    pub fn prepare(&self, exchange: &mut Exchange) -> TransportResult<RequestStream> {
        if self.is_closed() {
            return Err(TransportError::Shutdown(format!(
                "conduit to {} is closed",
                self.target
            )));
        }
        let message = &mut exchange.out_message;
        let address = message
            .address
            .clone()
            .or_else(|| message.context.endpoint_address().map(str::to_string))
            .unwrap_or_else(|| self.target.address().to_string());
        let url = parse_target(&address)?;

        let method = match message.http_method.as_deref() {
            Some(name) => Method::from_bytes(name.as_bytes()).map_err(|_| {
                TransportError::ConfigurationError(format!("invalid HTTP method {name}"))
            })?,
            None => Method::POST,
        };

        let wants_async = message
            .use_async
            .unwrap_or_else(|| self.ctx.config.use_async.use_async(exchange.synchronous));
        let use_async = wants_async && !self.ctx.is_shutdown();
        message.use_async = Some(use_async);
        let mode = if use_async {
            ExecutionMode::Reactor
        } else {
            ExecutionMode::Direct
        };

        let mut headers = message.headers.clone();
        if let Some(auth) = &self.ctx.config.authorization
            && auth.preemptive
            && message.header("authorization").is_none()
        {
            headers.push(("Authorization".to_string(), auth.header_value()));
        }

        debug!(target = %url, method = %method, ?mode, "Prepared request");
        let plan = RequestPlan {
            url,
            method,
            content_type: message.content_type.clone(),
            headers,
        };
        Ok(RequestStream::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.tasks),
            plan,
            mode,
        ))
    }

    /// Records the response on the exchange.
    ///
    /// 404 and 503 become a "service not available" failure when the exchange
    /// asked for it; other statuses of 400 and above except 500 are protocol
    /// errors. A 500 carries an application fault in its body and is returned
    /// to the caller as a response.
    fn apply_response(
        &self,
        exchange: &mut Exchange,
        response: ResponsePart<'_>,
    ) -> TransportResult<()> {
        let ResponsePart {
            head,
            payload,
            tls,
            address,
        } = response;
        let status = head.status;
        exchange.response_code = Some(status);

        let mut inbound = Message::new();
        inbound.content_type = head.header("content-type").map(str::to_string);
        inbound.headers = head.headers;
        inbound.payload = payload;
        inbound.address = Some(address.to_string());
        if let Some(session) = tls
            && let Ok(value) = serde_json::to_value(session)
        {
            inbound
                .properties
                .insert(TLS_SESSION_PROPERTY.to_string(), value);
        }
        exchange.in_message = Some(inbound);

        if exchange.complete_if_service_not_available && matches!(status, 404 | 503) {
            exchange.service_not_available = true;
            return Err(TransportError::ServiceNotAvailable {
                address: address.to_string(),
                status,
            });
        }
        if status >= 400 && status != 500 {
            return Err(TransportError::ProtocolError(format!(
                "HTTP response '{status}: {}' when communicating with {address}",
                head.reason.as_deref().unwrap_or("Unknown")
            )));
        }
        Ok(())
    }
}

/// Inbound message property holding the [`TlsSessionInfo`] of the response.
pub const TLS_SESSION_PROPERTY: &str = "switchyard.tls.session";

struct ResponsePart<'a> {
    head: ResponseHead,
    payload: Bytes,
    tls: Option<TlsSessionInfo>,
    address: &'a str,
}

fn parse_target(address: &str) -> TransportResult<Url> {
    let mut url = Url::parse(address)
        .map_err(|e| TransportError::ConfigurationError(format!("invalid address {address}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TransportError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.path().is_empty() {
        url.set_path("/");
    }
    Ok(url)
}

impl Conduit for AsyncConduit {
    fn target(&self) -> &Endpoint {
        &self.target
    }

    fn send(&self, exchange: &mut Exchange) -> TransportResult<()> {
        let mut stream = self.prepare(exchange)?;
        stream.write_bytes(exchange.out_message.payload.clone())?;
        let response = stream.finish()?;

        let one_way = exchange.operation.as_ref().is_some_and(|op| op.one_way);
        let payload = if one_way {
            Bytes::new()
        } else {
            response.body.into_bytes()?
        };
        self.apply_response(
            exchange,
            ResponsePart {
                head: response.head,
                payload,
                tls: response.tls,
                address: &response.address,
            },
        )
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let aborted = self.tasks.abort_all();
            if aborted > 0 {
                warn!(target = %self.target, aborted, "Closed conduit with requests in flight");
            } else {
                debug!(target = %self.target, "Closed conduit");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
