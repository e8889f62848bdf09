//! Shared buffers bridging blocking caller threads and the I/O reactor.
//!
//! Each buffer is one fixed ring guarded by one mutex and one condition
//! variable. The blocking side (a caller thread) waits on the condition
//! variable; the reactor side never blocks and is steered through an
//! [`IoControl`] instead. Chunks at or above [`BufferConfig::direct_threshold`]
//! skip the ring through a single-slot hand-off.
//!
//! Shutdown is terminal and idempotent: readers see end of stream, writers get
//! an error, and every waiter on either side wakes immediately.

mod control;
mod input;
mod output;
mod ring;

pub use control::{IoControl, ReactorSignal};
pub use input::{ConsumeOutcome, SharedInputBuffer};
pub use output::{Produced, SharedOutputBuffer};

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use switchyard_core::{TransportError, TransportResult};

use ring::RingBuffer;

/// Sizing and flow control settings for a shared buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Ring capacity in bytes.
    pub capacity: usize,

    /// Fill ratio at which the reactor is told to suspend input, or asked to
    /// start draining output.
    pub suspend_ratio: f64,

    /// Chunks at least this large are handed over without copying into the ring.
    pub direct_threshold: usize,

    /// Upper bound on a single blocking wait. `None` waits until woken.
    pub wait_timeout: Option<Duration>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 16320,
            suspend_ratio: 0.75,
            direct_threshold: 64 * 1024,
            wait_timeout: None,
        }
    }
}

impl BufferConfig {
    /// Small buffers, useful to exercise backpressure.
    #[must_use]
    pub fn small(capacity: usize) -> Self {
        Self {
            capacity,
            direct_threshold: capacity.saturating_mul(4).max(1),
            ..Self::default()
        }
    }

    /// Sets the ring capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the blocking wait timeout.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Byte count at which flow control kicks in.
    pub fn threshold(&self) -> usize {
        let raw = (self.capacity as f64 * self.suspend_ratio).floor() as usize;
        raw.clamp(1, self.capacity.max(1))
    }

    /// Checks the settings for consistency.
    pub fn validate(&self) -> TransportResult<()> {
        if self.capacity == 0 {
            return Err(TransportError::ConfigurationError(
                "buffer capacity must be greater than zero".to_string(),
            ));
        }
        if !(self.suspend_ratio > 0.0 && self.suspend_ratio <= 1.0) {
            return Err(TransportError::ConfigurationError(format!(
                "suspend_ratio must be in (0, 1], got {}",
                self.suspend_ratio
            )));
        }
        if self.direct_threshold == 0 {
            return Err(TransportError::ConfigurationError(
                "direct_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BufferState {
    ring: RingBuffer,
    large: Option<Bytes>,
    end_of_stream: bool,
    shutdown: bool,
    suspended: bool,
}

impl BufferState {
    fn available(&self) -> usize {
        self.ring.len() + self.large.as_ref().map_or(0, Bytes::len)
    }
}

/// Lock, condition variable and control shared by both buffer directions.
#[derive(Debug)]
struct Shared {
    state: Mutex<BufferState>,
    cond: Condvar,
    control: Arc<dyn IoControl>,
    config: BufferConfig,
    threshold: usize,
}

impl Shared {
    fn new(config: BufferConfig, control: Arc<dyn IoControl>) -> Self {
        let threshold = config.threshold();
        Self {
            state: Mutex::new(BufferState {
                ring: RingBuffer::new(config.capacity),
                large: None,
                end_of_stream: false,
                shutdown: false,
                suspended: false,
            }),
            cond: Condvar::new(),
            control,
            config,
            threshold,
        }
    }

    /// Blocks on the condition variable, honouring the configured wait timeout.
    fn wait(&self, state: &mut MutexGuard<'_, BufferState>) -> TransportResult<()> {
        match self.config.wait_timeout {
            Some(timeout) => {
                if self.cond.wait_for(state, timeout).timed_out() {
                    return Err(TransportError::Timeout);
                }
                Ok(())
            }
            None => {
                self.cond.wait(state);
                Ok(())
            }
        }
    }

    /// Like [`Shared::wait`], but also gives up at `deadline`.
    fn wait_until(
        &self,
        state: &mut MutexGuard<'_, BufferState>,
        deadline: Instant,
    ) -> TransportResult<()> {
        let deadline = match self.config.wait_timeout {
            Some(timeout) => deadline.min(Instant::now() + timeout),
            None => deadline,
        };
        if self.cond.wait_until(state, deadline).timed_out() {
            return Err(TransportError::Timeout);
        }
        Ok(())
    }

    /// Marks the buffer shut down. Returns false if it already was.
    fn shutdown(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        state.shutdown = true;
        state.ring.clear();
        state.large = None;
        self.cond.notify_all();
        true
    }

    fn capacity(&self) -> usize {
        self.config.capacity
    }

    fn available(&self) -> usize {
        self.state.lock().available()
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    fn is_end_of_stream(&self) -> bool {
        self.state.lock().end_of_stream
    }
}
