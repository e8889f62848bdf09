//! Reactor side of a request: connect, exchange over HTTP/1.1, pump the body.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, HeaderName, HeaderValue, USER_AGENT};
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use switchyard_core::{AtomicMetrics, TransportError, TransportResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace};
use url::Url;

use super::TlsSessionInfo;
use super::factory::ConduitContext;
use super::response::{ResponseHead, ResponseSlot};
use crate::buffer::{ConsumeOutcome, Produced, ReactorSignal, SharedInputBuffer, SharedOutputBuffer};

/// Largest chunk handed to hyper per frame.
const MAX_FRAME: usize = 16 * 1024;

/// Everything needed to put one request on the wire.
#[derive(Debug, Clone)]
pub(crate) struct RequestPlan {
    pub(crate) url: Url,
    pub(crate) method: Method,
    pub(crate) content_type: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
}

impl RequestPlan {
    pub(crate) fn target(&self) -> &str {
        self.url.as_str()
    }

    fn authority(&self) -> TransportResult<(String, u16)> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| TransportError::ConfigurationError(format!("{} has no host", self.url)))?;
        let port = self.url.port_or_known_default().ok_or_else(|| {
            TransportError::ConfigurationError(format!("{} has no port", self.url))
        })?;
        Ok((host.trim_matches(['[', ']']).to_string(), port))
    }

    fn build(
        &self,
        body: BoxBody<Bytes, TransportError>,
        content_length: Option<u64>,
        user_agent: &str,
    ) -> TransportResult<Request<BoxBody<Bytes, TransportError>>> {
        let mut path = self.url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = self.url.query() {
            path.push('?');
            path.push_str(query);
        }
        let host = match self.url.port() {
            Some(port) => format!("{}:{port}", self.url.host_str().unwrap_or_default()),
            None => self.url.host_str().unwrap_or_default().to_string(),
        };

        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(path)
            .header(HOST, host)
            .header(USER_AGENT, user_agent);
        if let Some(content_type) = &self.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        if let Some(length) = content_length {
            builder = builder.header(CONTENT_LENGTH, length);
        }
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::ProtocolError(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::ProtocolError(format!("header {name}: {e}")))?;
            builder = builder.header(name, value);
        }
        builder
            .body(body)
            .map_err(|e| TransportError::ProtocolError(e.to_string()))
    }
}

/// Request body streamed out of a [`SharedOutputBuffer`].
#[derive(Debug)]
pub(crate) struct OutboundBody {
    output: Arc<SharedOutputBuffer>,
    signal: Arc<ReactorSignal>,
    length: Option<u64>,
    metrics: Arc<AtomicMetrics>,
}

impl OutboundBody {
    pub(crate) fn new(
        output: Arc<SharedOutputBuffer>,
        signal: Arc<ReactorSignal>,
        length: Option<u64>,
        metrics: Arc<AtomicMetrics>,
    ) -> Self {
        Self {
            output,
            signal,
            length,
            metrics,
        }
    }
}

impl Body for OutboundBody {
    type Data = Bytes;
    type Error = TransportError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, TransportError>>> {
        // Register before producing so a request_output racing with an empty
        // produce still wakes this task.
        let _ = self.signal.poll_output_requested(cx);
        match self.output.produce(MAX_FRAME) {
            Produced::Data(bytes) => {
                self.metrics
                    .bytes_sent
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Produced::Pending => Poll::Pending,
            Produced::Finished => Poll::Ready(None),
            Produced::Closed => Poll::Ready(Some(Err(TransportError::Shutdown(
                "request body aborted".to_string(),
            )))),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self.length {
            Some(length) => SizeHint::with_exact(length),
            None => SizeHint::default(),
        }
    }
}

/// A complete in-memory body.
pub(crate) fn full_body(bytes: Bytes) -> BoxBody<Bytes, TransportError> {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

/// Connects, optionally wraps in TLS, and sends one request.
pub(crate) async fn round_trip(
    ctx: &ConduitContext,
    plan: &RequestPlan,
    body: BoxBody<Bytes, TransportError>,
    content_length: Option<u64>,
) -> TransportResult<(Response<Incoming>, Option<TlsSessionInfo>)> {
    let (host, port) = plan.authority()?;
    let connect_timeout = ctx.config.timeouts.connect;

    AtomicMetrics::incr(&ctx.metrics.connections);
    let tcp = match tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(tcp)) => tcp,
        Ok(Err(e)) => {
            AtomicMetrics::incr(&ctx.metrics.failed_connections);
            return Err(TransportError::ConnectionFailed(format!("{host}:{port}: {e}")));
        }
        Err(_) => {
            AtomicMetrics::incr(&ctx.metrics.failed_connections);
            AtomicMetrics::incr(&ctx.metrics.timeouts);
            return Err(TransportError::ConnectionTimeout {
                target: plan.target().to_string(),
                timeout: connect_timeout,
            });
        }
    };
    tcp.set_nodelay(true)?;
    debug!(target = %plan.url, "Connected");

    let request = plan.build(body, content_length, &ctx.config.user_agent)?;
    match plan.url.scheme() {
        "https" => https_round_trip(ctx, &host, tcp, request).await,
        _ => Ok((send_over(tcp, request).await?, None)),
    }
}

#[cfg(feature = "tls")]
async fn https_round_trip(
    ctx: &ConduitContext,
    host: &str,
    tcp: TcpStream,
    request: Request<BoxBody<Bytes, TransportError>>,
) -> TransportResult<(Response<Incoming>, Option<TlsSessionInfo>)> {
    let config = ctx.tls.get_or_build(&ctx.config.tls)?;
    let (stream, session) = super::tls::handshake(config, host, &ctx.config.tls, tcp).await?;
    debug!(
        host,
        protocol = ?session.protocol,
        cipher = ?session.cipher_suite,
        "TLS session established"
    );
    Ok((send_over(stream, request).await?, Some(session)))
}

#[cfg(not(feature = "tls"))]
async fn https_round_trip(
    _ctx: &ConduitContext,
    _host: &str,
    _tcp: TcpStream,
    _request: Request<BoxBody<Bytes, TransportError>>,
) -> TransportResult<(Response<Incoming>, Option<TlsSessionInfo>)> {
    Err(TransportError::ConfigurationError(
        "https targets require the `tls` feature".to_string(),
    ))
}

async fn send_over<T>(
    io: T,
    request: Request<BoxBody<Bytes, TransportError>>,
) -> TransportResult<Response<Incoming>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(classify_hyper_error)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            trace!(error = %e, "Connection closed with error");
        }
    });
    sender
        .send_request(request)
        .await
        .map_err(classify_hyper_error)
}

/// Maps a hyper failure onto the transport taxonomy, recovering errors that
/// were raised by our own request body.
pub(crate) fn classify_hyper_error(err: hyper::Error) -> TransportError {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(transport) = cause.downcast_ref::<TransportError>() {
            return transport.clone();
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return TransportError::from(std::io::Error::new(io.kind(), io.to_string()));
        }
        source = cause.source();
    }
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_parse() {
        TransportError::ProtocolError(err.to_string())
    } else if err.is_canceled() || err.is_closed() || err.is_incomplete_message() {
        TransportError::ConnectionLost(err.to_string())
    } else if err.is_user() {
        TransportError::Internal(err.to_string())
    } else {
        TransportError::ReceiveFailed(err.to_string())
    }
}

pub(crate) fn response_head(response: &Response<Incoming>) -> ResponseHead {
    ResponseHead {
        status: response.status().as_u16(),
        reason: response.status().canonical_reason().map(str::to_string),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    }
}

/// Channels between one reactor task and the caller thread.
#[derive(Debug, Clone)]
pub(crate) struct ReactorChannels {
    pub(crate) output: Arc<SharedOutputBuffer>,
    pub(crate) input: Arc<SharedInputBuffer>,
    pub(crate) slot: Arc<ResponseSlot>,
    pub(crate) signal: Arc<ReactorSignal>,
}

impl ReactorChannels {
    /// Failure callback: record the error and shut both buffers.
    pub(crate) fn failed(&self, error: TransportError) {
        self.slot.fail(error);
        self.output.shutdown();
        self.input.shutdown();
    }

    /// Cancellation callback.
    pub(crate) fn cancelled(&self) {
        self.slot.cancel();
        self.output.shutdown();
        self.input.shutdown();
    }
}

/// Reactor task body for one streamed request.
pub(crate) async fn drive(
    ctx: Arc<ConduitContext>,
    plan: RequestPlan,
    channels: ReactorChannels,
    content_length: Option<u64>,
) {
    let body = OutboundBody::new(
        Arc::clone(&channels.output),
        Arc::clone(&channels.signal),
        content_length,
        Arc::clone(&ctx.metrics),
    );
    let outcome = async {
        let (response, tls) = round_trip(&ctx, &plan, body.boxed(), content_length).await?;
        AtomicMetrics::incr(&ctx.metrics.responses_received);
        channels.slot.publish(response_head(&response), tls);
        pump_body(&ctx, response.into_body(), &channels).await
    }
    .await;

    match outcome {
        Ok(()) => channels.input.set_end_of_stream(),
        Err(error) => {
            debug!(target = %plan.url, error = %error, "Reactor request failed");
            channels.failed(error);
        }
    }
}

async fn pump_body(
    ctx: &ConduitContext,
    mut body: Incoming,
    channels: &ReactorChannels,
) -> TransportResult<()> {
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(classify_hyper_error)?;
        let Ok(mut data) = frame.into_data() else {
            continue;
        };
        ctx.metrics
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        loop {
            match channels.input.consume(&mut data) {
                ConsumeOutcome::Closed => return Ok(()),
                ConsumeOutcome::Accepted(_) => {}
                ConsumeOutcome::Suspended(_) => channels.signal.input_requested().await,
            }
            if data.is_empty() {
                break;
            }
        }
    }
    Ok(())
}

/// Runs a fully buffered request on the caller thread.
pub(crate) fn execute_direct(
    ctx: &ConduitContext,
    plan: &RequestPlan,
    body: Bytes,
) -> TransportResult<(ResponseHead, Bytes, Option<TlsSessionInfo>)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let receive = ctx.config.timeouts.receive;
    let length = body.len() as u64;

    let exchange = async {
        let (response, tls) = round_trip(ctx, plan, full_body(body), Some(length)).await?;
        ctx.metrics.bytes_sent.fetch_add(length, Ordering::Relaxed);
        AtomicMetrics::incr(&ctx.metrics.responses_received);
        let head = response_head(&response);
        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(classify_hyper_error)?
            .to_bytes();
        ctx.metrics
            .bytes_received
            .fetch_add(collected.len() as u64, Ordering::Relaxed);
        Ok::<_, TransportError>((head, collected, tls))
    };

    runtime.block_on(async {
        tokio::time::timeout(receive, exchange)
            .await
            .map_err(|_| TransportError::ReadTimeout {
                target: plan.target().to_string(),
                timeout: receive,
            })?
    })
}
