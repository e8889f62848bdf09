//! Inbound buffer: filled by the reactor, drained by a caller thread.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, Bytes};
use parking_lot::MutexGuard;
use switchyard_core::TransportResult;

use super::{BufferConfig, BufferState, IoControl, Shared};

/// Result of offering a chunk to [`SharedInputBuffer::consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Bytes taken; the reactor may keep reading.
    Accepted(usize),
    /// Bytes taken; input is suspended until the consumer makes room.
    /// Whatever is left in the chunk must be offered again after resuming.
    Suspended(usize),
    /// The buffer was shut down; the chunk is discarded.
    Closed,
}

/// Response body buffer between the reactor and a blocking reader.
#[derive(Debug)]
pub struct SharedInputBuffer {
    shared: Shared,
}

impl SharedInputBuffer {
    /// Creates an input buffer steering the reactor through `control`.
    pub fn new(config: BufferConfig, control: Arc<dyn IoControl>) -> Self {
        Self {
            shared: Shared::new(config, control),
        }
    }

    /// Reactor side: takes as much of `chunk` as fits, advancing it.
    pub fn consume(&self, chunk: &mut Bytes) -> ConsumeOutcome {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return ConsumeOutcome::Closed;
        }
        if state.large.is_some() {
            // Nothing may overtake a pending hand-off
            return self.suspend(&mut state, 0);
        }

        let accepted = if chunk.len() >= self.shared.config.direct_threshold {
            let len = chunk.len();
            state.large = Some(chunk.split_to(len));
            len
        } else {
            let written = state.ring.write(chunk);
            chunk.advance(written);
            written
        };
        if accepted > 0 {
            self.shared.cond.notify_all();
        }

        if !chunk.is_empty() || state.large.is_some() || state.ring.len() >= self.shared.threshold
        {
            self.suspend(&mut state, accepted)
        } else {
            ConsumeOutcome::Accepted(accepted)
        }
    }

    fn suspend(&self, state: &mut MutexGuard<'_, BufferState>, accepted: usize) -> ConsumeOutcome {
        state.suspended = true;
        self.shared.control.suspend_input();
        ConsumeOutcome::Suspended(accepted)
    }

    /// Reactor side: no more data will arrive.
    pub fn set_end_of_stream(&self) {
        let mut state = self.shared.state.lock();
        state.end_of_stream = true;
        self.shared.cond.notify_all();
    }

    /// Reads into `dst`, blocking until data, end of stream or shutdown.
    ///
    /// Returns `Ok(0)` at end of stream and after shutdown.
    pub fn read(&self, dst: &mut [u8]) -> TransportResult<usize> {
        self.read_inner(dst, None)
    }

    /// Like [`SharedInputBuffer::read`], but fails with
    /// [`TransportError::Timeout`](switchyard_core::TransportError::Timeout)
    /// once `deadline` passes without data.
    pub fn read_until(&self, dst: &mut [u8], deadline: Instant) -> TransportResult<usize> {
        self.read_inner(dst, Some(deadline))
    }

    fn read_inner(&self, dst: &mut [u8], deadline: Option<Instant>) -> TransportResult<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.state.lock();
        let count = loop {
            if state.shutdown {
                return Ok(0);
            }
            if !state.ring.is_empty() {
                break state.ring.read(dst);
            }
            if let Some(large) = state.large.as_mut() {
                let count = dst.len().min(large.len());
                dst[..count].copy_from_slice(&large[..count]);
                large.advance(count);
                if large.is_empty() {
                    state.large = None;
                }
                break count;
            }
            if state.end_of_stream {
                return Ok(0);
            }
            self.resume(&mut state);
            match deadline {
                Some(deadline) => self.shared.wait_until(&mut state, deadline)?,
                None => self.shared.wait(&mut state)?,
            }
        };
        if state.large.is_none() && state.ring.len() < self.shared.threshold {
            self.resume(&mut state);
        }
        Ok(count)
    }

    fn resume(&self, state: &mut MutexGuard<'_, BufferState>) {
        if state.suspended && !state.end_of_stream {
            state.suspended = false;
            self.shared.control.request_input();
        }
    }

    /// Bytes ready to be read without blocking.
    pub fn available(&self) -> usize {
        self.shared.available()
    }

    /// Whether any bytes are ready.
    pub fn has_data(&self) -> bool {
        self.available() > 0
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Whether the reactor signalled end of stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.shared.is_end_of_stream()
    }

    /// Whether [`SharedInputBuffer::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Terminal. Discards content, wakes blocked readers and the reactor.
    pub fn shutdown(&self) {
        if self.shared.shutdown() {
            self.shared.control.request_input();
        }
    }
}
