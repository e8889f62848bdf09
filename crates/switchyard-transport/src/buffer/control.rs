//! Reactor flow control callbacks.

use std::fmt;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::task::AtomicWaker;

/// Callbacks a shared buffer uses to steer the reactor side of a connection.
///
/// Implementations must be cheap and must not block: buffers invoke them while
/// holding their internal lock.
pub trait IoControl: Send + Sync + fmt::Debug {
    /// Stop delivering inbound data; the input buffer is full enough.
    fn suspend_input(&self);

    /// Resume delivering inbound data.
    fn request_input(&self);

    /// Nothing to send right now.
    fn suspend_output(&self);

    /// Outbound data (or end of stream) is ready to be produced.
    fn request_output(&self);
}

/// [`IoControl`] for reactor tasks running on tokio.
///
/// The flags start in the "input wanted, no output yet" state. Tasks await
/// [`ReactorSignal::input_requested`] / [`ReactorSignal::output_requested`].
#[derive(Default)]
pub struct ReactorSignal {
    input_suspended: AtomicBool,
    output_requested: AtomicBool,
    input_waker: AtomicWaker,
    output_waker: AtomicWaker,
}

impl ReactorSignal {
    /// Creates a signal pair.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the input buffer asked the reactor to stop reading.
    pub fn is_input_suspended(&self) -> bool {
        self.input_suspended.load(Ordering::Acquire)
    }

    /// Whether the output buffer has something for the reactor.
    pub fn is_output_requested(&self) -> bool {
        self.output_requested.load(Ordering::Acquire)
    }

    /// Ready once input is no longer suspended.
    pub fn poll_input_requested(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.input_waker.register(cx.waker());
        if self.is_input_suspended() {
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }

    /// Registers interest in output; ready once output was requested.
    pub fn poll_output_requested(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.output_waker.register(cx.waker());
        if self.is_output_requested() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    /// Waits until the input buffer has room again.
    pub async fn input_requested(&self) {
        poll_fn(|cx| self.poll_input_requested(cx)).await;
    }

    /// Waits until the output buffer has data for the reactor.
    pub async fn output_requested(&self) {
        poll_fn(|cx| self.poll_output_requested(cx)).await;
    }
}

impl IoControl for ReactorSignal {
    fn suspend_input(&self) {
        self.input_suspended.store(true, Ordering::Release);
    }

    fn request_input(&self) {
        self.input_suspended.store(false, Ordering::Release);
        self.input_waker.wake();
    }

    fn suspend_output(&self) {
        self.output_requested.store(false, Ordering::Release);
    }

    fn request_output(&self) {
        self.output_requested.store(true, Ordering::Release);
        self.output_waker.wake();
    }
}

impl fmt::Debug for ReactorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorSignal")
            .field("input_suspended", &self.is_input_suspended())
            .field("output_requested", &self.is_output_requested())
            .finish()
    }
}
