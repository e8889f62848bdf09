//! Blocking request stream handed to callers by [`AsyncConduit::prepare`].

use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use switchyard_core::{AtomicMetrics, TransportError, TransportResult};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use url::Url;

use super::TaskRegistry;
use super::driver::{self, ReactorChannels, RequestPlan};
use super::factory::ConduitContext;
use super::response::{HttpResponse, ReceiveDeadline, ResponseBody, ResponseSlot};
use crate::buffer::{ReactorSignal, SharedInputBuffer, SharedOutputBuffer};

/// How the request is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Streamed through shared buffers by a reactor task.
    Reactor,
    /// Fully buffered and executed on the caller thread.
    Direct,
}

/// A request in flight on the reactor.
#[derive(Debug)]
struct ActiveRequest {
    channels: ReactorChannels,
    abort: AbortHandle,
}

impl ActiveRequest {
    fn cancel(&self) {
        self.abort.abort();
        self.channels.cancelled();
    }
}

/// The request body side of one conduit round trip.
///
/// Bytes written are held back until they exceed the chunking threshold. A
/// body that stays below it is sent with a fixed `Content-Length`; a larger
/// one is streamed chunked through a [`SharedOutputBuffer`] while the caller
/// keeps writing. [`RequestStream::finish`] completes the body and waits for
/// the response head.
#[derive(Debug)]
pub struct RequestStream {
    ctx: Arc<ConduitContext>,
    tasks: Arc<TaskRegistry>,
    plan: RequestPlan,
    mode: ExecutionMode,
    pending: BytesMut,
    cache: Option<BytesMut>,
    active: Option<ActiveRequest>,
    authorized: bool,
    started: Instant,
}

impl RequestStream {
    pub(crate) fn new(
        ctx: Arc<ConduitContext>,
        tasks: Arc<TaskRegistry>,
        plan: RequestPlan,
        mode: ExecutionMode,
    ) -> Self {
        let cache = ctx.config.caches_requests().then(BytesMut::new);
        let authorized = plan
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"));
        Self {
            ctx,
            tasks,
            plan,
            mode,
            pending: BytesMut::new(),
            cache,
            active: None,
            authorized,
            started: Instant::now(),
        }
    }

    /// Execution mode chosen for this request.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Target URL.
    pub fn target(&self) -> &str {
        self.plan.target()
    }

    /// Whether the body is being streamed chunked.
    pub fn is_chunked(&self) -> bool {
        self.active.is_some()
    }

    /// Appends a chunk of body, without copying when it is large.
    pub fn write_bytes(&mut self, data: Bytes) -> TransportResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.extend_from_slice(&data);
        }
        if let Some(active) = &self.active {
            return active
                .channels
                .output
                .write_bytes(data)
                .map_err(|e| active.channels.slot.error().unwrap_or(e));
        }
        self.pending.extend_from_slice(&data);
        if self.mode == ExecutionMode::Reactor
            && self.ctx.config.allow_chunking
            && self.pending.len() > self.ctx.config.chunking_threshold
        {
            self.start_chunked()?;
        }
        Ok(())
    }

    fn start_chunked(&mut self) -> TransportResult<()> {
        let active = self.spawn(None);
        let held = std::mem::take(&mut self.pending).freeze();
        active.channels.output.write_bytes(held)?;
        debug!(target = %self.plan.url, "Streaming request body chunked");
        self.active = Some(active);
        Ok(())
    }

    fn spawn(&self, content_length: Option<u64>) -> ActiveRequest {
        let signal = Arc::new(ReactorSignal::new());
        let buffer = self.ctx.config.buffer.clone();
        let channels = ReactorChannels {
            output: Arc::new(SharedOutputBuffer::new(buffer.clone(), signal.clone())),
            input: Arc::new(SharedInputBuffer::new(buffer, signal.clone())),
            slot: Arc::new(ResponseSlot::default()),
            signal,
        };
        AtomicMetrics::incr(&self.ctx.metrics.requests_sent);
        let task = self.ctx.handle.spawn(driver::drive(
            Arc::clone(&self.ctx),
            self.plan.clone(),
            channels.clone(),
            content_length,
        ));
        let abort = task.abort_handle();
        self.tasks.track(abort.clone(), channels.clone());
        ActiveRequest { channels, abort }
    }

    /// Completes the body and waits for the response.
    ///
    /// Follows redirects and answers a Basic challenge by retransmitting the
    /// cached body, up to `max_retransmits` times.
    pub fn finish(mut self) -> TransportResult<HttpResponse> {
        let mut retransmits = 0;
        loop {
            let response = self.exchange_once()?;
            let Some(next) = self.retransmission_target(&response, retransmits) else {
                self.ctx
                    .metrics
                    .update_latency_us(self.started.elapsed().as_micros() as u64);
                return Ok(response);
            };
            retransmits += 1;
            AtomicMetrics::incr(&self.ctx.metrics.retransmissions);
            drop(response);
            self.retransmit(next)?;
        }
    }

    fn exchange_once(&mut self) -> TransportResult<HttpResponse> {
        let receive = self.ctx.config.timeouts.receive;
        match self.mode {
            ExecutionMode::Direct => {
                AtomicMetrics::incr(&self.ctx.metrics.requests_sent);
                AtomicMetrics::incr(&self.ctx.metrics.direct_requests);
                let body = self.pending.clone().freeze();
                let result = driver::execute_direct(&self.ctx, &self.plan, body);
                if matches!(result, Err(ref e) if e.is_timeout()) {
                    AtomicMetrics::incr(&self.ctx.metrics.timeouts);
                }
                let (head, bytes, tls) = result?;
                Ok(HttpResponse {
                    head,
                    body: ResponseBody::buffered(bytes),
                    tls,
                    address: self.plan.url.to_string(),
                })
            }
            ExecutionMode::Reactor => {
                let active = match self.active.take() {
                    Some(active) => active,
                    None => {
                        let held = self.pending.clone().freeze();
                        let active = self.spawn(Some(held.len() as u64));
                        if let Err(e) = active.channels.output.write_bytes(held) {
                            return Err(self.fail_with(&active, e));
                        }
                        active
                    }
                };
                if let Err(e) = active.channels.output.write_completed() {
                    return Err(self.fail_with(&active, e));
                }
                let deadline = ReceiveDeadline::new(receive, self.plan.target());
                match active.channels.slot.await_head(&deadline) {
                    Ok((head, tls)) => Ok(HttpResponse {
                        head,
                        body: ResponseBody::streamed(
                            active.channels,
                            active.abort,
                            deadline,
                            Arc::clone(&self.ctx.metrics),
                        ),
                        tls,
                        address: self.plan.url.to_string(),
                    }),
                    Err(e) => {
                        if e.is_timeout() {
                            AtomicMetrics::incr(&self.ctx.metrics.timeouts);
                        }
                        active.abort.abort();
                        active.channels.output.shutdown();
                        active.channels.input.shutdown();
                        Err(e)
                    }
                }
            }
        }
    }

    /// Prefers the failure the reactor recorded over the local symptom.
    fn fail_with(&self, active: &ActiveRequest, local: TransportError) -> TransportError {
        let error = active.channels.slot.error().unwrap_or(local);
        active.cancel();
        error
    }

    fn retransmission_target(&self, response: &HttpResponse, retransmits: usize) -> Option<Url> {
        let config = &self.ctx.config;
        let head = &response.head;
        let wants_redirect = config.auto_redirect && head.is_redirect();
        let wants_auth = head.status == 401 && config.authorization.is_some() && !self.authorized;
        if !wants_redirect && !wants_auth {
            return None;
        }
        if retransmits >= config.max_retransmits {
            warn!(target = %self.plan.url, retransmits, "Retransmission limit reached");
            return None;
        }
        if self.cache.is_none() {
            warn!(target = %self.plan.url, "Request body was not cached; cannot retransmit");
            return None;
        }
        if wants_auth {
            return Some(self.plan.url.clone());
        }
        let location = head.header("location")?;
        match self.plan.url.join(location) {
            Ok(next) if matches!(next.scheme(), "http" | "https") => Some(next),
            Ok(next) => {
                warn!(location = %next, "Refusing redirect to unsupported scheme");
                None
            }
            Err(e) => {
                warn!(location, error = %e, "Invalid redirect location");
                None
            }
        }
    }

    /// Replays the cached body against `url` on fresh buffers.
    fn retransmit(&mut self, url: Url) -> TransportResult<()> {
        if let Some(active) = self.active.take() {
            active.cancel();
        }
        if url == self.plan.url {
            if let Some(auth) = &self.ctx.config.authorization {
                self.plan
                    .headers
                    .push(("Authorization".to_string(), auth.header_value()));
                self.authorized = true;
            }
        } else {
            debug!(from = %self.plan.url, to = %url, "Following redirect");
            self.plan.url = url;
        }
        let cached = self.cache.as_ref().map(|c| c.clone().freeze()).unwrap_or_default();
        self.pending = BytesMut::from(&cached[..]);
        Ok(())
    }
}

impl io::Write for RequestStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(Bytes::copy_from_slice(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(active) = &self.active {
            active.channels.output.flush()?;
        }
        Ok(())
    }
}

impl Drop for RequestStream {
    fn drop(&mut self) {
        // Abandoned before finish
        if let Some(active) = self.active.take() {
            active.cancel();
        }
    }
}
