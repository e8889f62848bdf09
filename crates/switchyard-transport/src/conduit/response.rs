//! Response hand-over from the reactor to the caller thread.

use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use switchyard_core::{AtomicMetrics, TransportError, TransportResult};
use tokio::task::AbortHandle;

use super::driver::ReactorChannels;

/// Negotiated TLS parameters of the connection a response came over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSessionInfo {
    /// Protocol version, e.g. `TLSv1_3`
    pub protocol: Option<String>,
    /// Negotiated cipher suite
    pub cipher_suite: Option<String>,
    /// Negotiated ALPN protocol
    pub alpn: Option<String>,
    /// Length of the peer certificate chain
    pub peer_certificates: usize,
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code
    pub status: u16,
    /// Canonical reason phrase, when known
    pub reason: Option<String>,
    /// Response headers in wire order
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// One receive timeout spanning the response head and the whole body.
#[derive(Debug, Clone)]
pub(crate) struct ReceiveDeadline {
    at: Instant,
    timeout: Duration,
    target: String,
}

impl ReceiveDeadline {
    pub(crate) fn new(timeout: Duration, target: &str) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
            target: target.to_string(),
        }
    }

    fn expired(&self) -> TransportError {
        TransportError::ReadTimeout {
            target: self.target.clone(),
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    head: Option<ResponseHead>,
    tls: Option<TlsSessionInfo>,
    error: Option<TransportError>,
    cancelled: bool,
}

/// One-shot rendezvous for the response head of a reactor-driven request.
///
/// The reactor publishes the head, a failure, or a cancellation; the caller
/// waits for whichever comes first, bounded by the receive timeout.
#[derive(Debug, Default)]
pub(crate) struct ResponseSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl ResponseSlot {
    pub(crate) fn publish(&self, head: ResponseHead, tls: Option<TlsSessionInfo>) {
        let mut state = self.state.lock();
        state.head = Some(head);
        state.tls = tls;
        self.cond.notify_all();
    }

    /// Records a failure. The first failure wins.
    pub(crate) fn fail(&self, error: TransportError) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            state.error = Some(error);
        }
        self.cond.notify_all();
    }

    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.cond.notify_all();
    }

    pub(crate) fn error(&self) -> Option<TransportError> {
        self.state.lock().error.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Waits for the head. On timeout the stored failure, if any, wins over
    /// the generic read timeout.
    pub(crate) fn await_head(
        &self,
        deadline: &ReceiveDeadline,
    ) -> TransportResult<(ResponseHead, Option<TlsSessionInfo>)> {
        let target = &deadline.target;
        let mut state = self.state.lock();
        loop {
            if let Some(head) = state.head.take() {
                return Ok((head, state.tls.take()));
            }
            if let Some(error) = &state.error {
                return Err(error.clone());
            }
            if state.cancelled {
                return Err(TransportError::Shutdown(format!(
                    "request to {target} was cancelled"
                )));
            }
            if self.cond.wait_until(&mut state, deadline.at).timed_out() {
                if let Some(head) = state.head.take() {
                    return Ok((head, state.tls.take()));
                }
                return Err(state.error.clone().unwrap_or_else(|| deadline.expired()));
            }
        }
    }
}

/// A response body, either streamed from the reactor or fully buffered.
#[derive(Debug)]
pub struct ResponseBody {
    inner: BodyInner,
}

#[derive(Debug)]
enum BodyInner {
    /// Read through the shared input buffer while the reactor fills it.
    Streamed(StreamedBody),
    /// Collected on the caller thread.
    Buffered(Cursor<Bytes>),
}

#[derive(Debug)]
struct StreamedBody {
    channels: ReactorChannels,
    abort: AbortHandle,
    deadline: ReceiveDeadline,
    metrics: Arc<AtomicMetrics>,
}

impl StreamedBody {
    fn read(&self, buf: &mut [u8]) -> TransportResult<usize> {
        let input = &self.channels.input;
        match input.read_until(buf, self.deadline.at) {
            Ok(0) if !buf.is_empty() => {
                if let Some(error) = self.channels.slot.error() {
                    return Err(error);
                }
                if self.channels.slot.is_cancelled() && !input.is_end_of_stream() {
                    return Err(TransportError::Shutdown(format!(
                        "response from {} was cancelled",
                        self.deadline.target
                    )));
                }
                Ok(0)
            }
            Err(error) if error.is_timeout() && Instant::now() >= self.deadline.at => {
                let error = self.deadline.expired();
                AtomicMetrics::incr(&self.metrics.timeouts);
                self.abort.abort();
                self.channels.failed(error.clone());
                Err(self.channels.slot.error().unwrap_or(error))
            }
            other => other,
        }
    }
}

impl ResponseBody {
    pub(crate) fn streamed(
        channels: ReactorChannels,
        abort: AbortHandle,
        deadline: ReceiveDeadline,
        metrics: Arc<AtomicMetrics>,
    ) -> Self {
        Self {
            inner: BodyInner::Streamed(StreamedBody {
                channels,
                abort,
                deadline,
                metrics,
            }),
        }
    }

    /// A body already held in memory.
    pub fn buffered(bytes: Bytes) -> Self {
        Self {
            inner: BodyInner::Buffered(Cursor::new(bytes)),
        }
    }

    /// Whether the body is still being streamed by the reactor.
    pub fn is_streamed(&self) -> bool {
        matches!(self.inner, BodyInner::Streamed(_))
    }

    /// Reads the remaining body into memory.
    pub fn into_bytes(self) -> TransportResult<Bytes> {
        match &self.inner {
            BodyInner::Buffered(cursor) => {
                let position = cursor.position() as usize;
                Ok(cursor.get_ref().slice(position..))
            }
            BodyInner::Streamed(body) => {
                let mut collected = Vec::new();
                let mut chunk = [0u8; 8 * 1024];
                loop {
                    let count = body.read(&mut chunk)?;
                    if count == 0 {
                        return Ok(Bytes::from(collected));
                    }
                    collected.extend_from_slice(&chunk[..count]);
                }
            }
        }
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            BodyInner::Buffered(cursor) => cursor.read(buf),
            BodyInner::Streamed(body) => Ok(body.read(buf)?),
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let BodyInner::Streamed(body) = &self.inner {
            body.channels.input.shutdown();
            if !body.channels.input.is_end_of_stream() {
                body.abort.abort();
            }
        }
    }
}

/// A response as returned by [`RequestStream::finish`](crate::RequestStream::finish).
#[derive(Debug)]
pub struct HttpResponse {
    /// Status line and headers
    pub head: ResponseHead,
    /// Body
    pub body: ResponseBody,
    /// TLS parameters, for `https` targets
    pub tls: Option<TlsSessionInfo>,
    /// Address that finally answered, after redirects
    pub address: String,
}
