//! Outbound buffer: filled by a caller thread, drained by the reactor.

use std::sync::Arc;

use bytes::Bytes;
use switchyard_core::{TransportError, TransportResult};

use super::{BufferConfig, IoControl, Shared};

/// Result of asking [`SharedOutputBuffer::produce`] for data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Produced {
    /// Bytes to put on the wire.
    Data(Bytes),
    /// Nothing buffered yet; output has been suspended until the writer asks.
    Pending,
    /// The writer completed and everything has been produced.
    Finished,
    /// The buffer was shut down.
    Closed,
}

/// Request body buffer between a blocking writer and the reactor.
#[derive(Debug)]
pub struct SharedOutputBuffer {
    shared: Shared,
}

impl SharedOutputBuffer {
    /// Creates an output buffer steering the reactor through `control`.
    pub fn new(config: BufferConfig, control: Arc<dyn IoControl>) -> Self {
        Self {
            shared: Shared::new(config, control),
        }
    }

    /// Writes all of `src`, blocking while the ring is full.
    pub fn write(&self, mut src: &[u8]) -> TransportResult<()> {
        let mut state = self.shared.state.lock();
        while !src.is_empty() {
            if state.shutdown {
                return Err(shut_down());
            }
            if state.end_of_stream {
                return Err(TransportError::Internal(
                    "write after the request body was completed".to_string(),
                ));
            }
            if state.large.is_some() || state.ring.remaining() == 0 {
                self.shared.control.request_output();
                self.shared.wait(&mut state)?;
                continue;
            }
            let written = state.ring.write(src);
            src = &src[written..];
            if state.ring.len() >= self.shared.threshold {
                self.shared.control.request_output();
            }
        }
        Ok(())
    }

    /// Writes a chunk, handing it over without copying when it is large.
    pub fn write_bytes(&self, data: Bytes) -> TransportResult<()> {
        if data.len() < self.shared.config.direct_threshold {
            return self.write(&data);
        }
        let mut state = self.shared.state.lock();
        loop {
            if state.shutdown {
                return Err(shut_down());
            }
            if state.large.is_none() {
                break;
            }
            self.shared.control.request_output();
            self.shared.wait(&mut state)?;
        }
        state.large = Some(data);
        self.shared.control.request_output();
        Ok(())
    }

    /// Asks the reactor to drain whatever is buffered.
    pub fn flush(&self) -> TransportResult<()> {
        let state = self.shared.state.lock();
        if state.shutdown {
            return Err(shut_down());
        }
        if state.available() > 0 {
            self.shared.control.request_output();
        }
        Ok(())
    }

    /// Marks the body complete. Idempotent.
    pub fn write_completed(&self) -> TransportResult<()> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(shut_down());
        }
        if !state.end_of_stream {
            state.end_of_stream = true;
            self.shared.cond.notify_all();
            self.shared.control.request_output();
        }
        Ok(())
    }

    /// Reactor side: takes up to `max` buffered bytes.
    ///
    /// Ring content always goes out before a pending hand-off chunk, which is
    /// produced whole.
    pub fn produce(&self, max: usize) -> Produced {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Produced::Closed;
        }
        let data = if !state.ring.is_empty() {
            state.ring.take(max.max(1))
        } else if let Some(large) = state.large.take() {
            large
        } else if state.end_of_stream {
            return Produced::Finished;
        } else {
            state.suspended = true;
            self.shared.control.suspend_output();
            return Produced::Pending;
        };
        state.suspended = false;
        self.shared.cond.notify_all();
        Produced::Data(data)
    }

    /// Bytes waiting to be produced.
    pub fn available(&self) -> usize {
        self.shared.available()
    }

    /// Whether any bytes are waiting.
    pub fn has_data(&self) -> bool {
        self.available() > 0
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Whether the writer completed the body.
    pub fn is_end_of_stream(&self) -> bool {
        self.shared.is_end_of_stream()
    }

    /// Whether [`SharedOutputBuffer::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Terminal. Discards content, fails blocked writers and wakes the reactor.
    pub fn shutdown(&self) {
        if self.shared.shutdown() {
            self.shared.control.request_output();
        }
    }
}

fn shut_down() -> TransportError {
    TransportError::Shutdown("output buffer shut down".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReactorSignal;
    use pretty_assertions::assert_eq;
    use std::thread;
    use std::time::Duration;

    fn buffer(capacity: usize) -> (Arc<SharedOutputBuffer>, Arc<ReactorSignal>) {
        let signal = Arc::new(ReactorSignal::new());
        let output = SharedOutputBuffer::new(BufferConfig::small(capacity), signal.clone());
        (Arc::new(output), signal)
    }

    fn drain(output: &SharedOutputBuffer) -> Vec<u8> {
        let mut collected = Vec::new();
        loop {
            match output.produce(1024) {
                Produced::Data(bytes) => collected.extend_from_slice(&bytes),
                Produced::Finished | Produced::Closed => return collected,
                Produced::Pending => thread::sleep(Duration::from_millis(1)),
            }
        }
    }

    #[test]
    fn test_write_then_produce() {
        let (output, signal) = buffer(16);
        assert_eq!(output.produce(16), Produced::Pending);
        assert!(!signal.is_output_requested());

        output.write(b"abc").unwrap();
        output.flush().unwrap();
        assert!(signal.is_output_requested());
        output.write_completed().unwrap();

        assert_eq!(output.produce(16), Produced::Data(Bytes::from_static(b"abc")));
        assert_eq!(output.produce(16), Produced::Finished);
    }

    #[test]
    fn test_writer_blocks_past_capacity_until_drained() {
        let (output, _) = buffer(8);
        let writer = {
            let output = Arc::clone(&output);
            thread::spawn(move || {
                output.write(b"0123456789abcdef").unwrap();
                output.write_completed().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());
        assert_eq!(output.available(), 8);

        let collected = drain(&output);
        writer.join().unwrap();
        assert_eq!(collected, b"0123456789abcdef".to_vec());
    }

    #[test]
    fn test_shutdown_fails_blocked_writer() {
        let (output, signal) = buffer(4);
        let writer = {
            let output = Arc::clone(&output);
            thread::spawn(move || output.write(b"0123456789"))
        };

        thread::sleep(Duration::from_millis(50));
        output.shutdown();
        output.shutdown();

        let result = writer.join().unwrap();
        assert!(matches!(result, Err(TransportError::Shutdown(_))));
        assert!(signal.is_output_requested());
        assert_eq!(output.produce(16), Produced::Closed);
        assert!(output.write(b"x").is_err());
    }

    #[test]
    fn test_large_chunk_ordered_after_ring_content() {
        let (output, _) = buffer(8);
        output.write(b"head").unwrap();
        output.write_bytes(Bytes::from(vec![b'L'; 40])).unwrap();

        assert_eq!(output.produce(64), Produced::Data(Bytes::from_static(b"head")));
        match output.produce(64) {
            Produced::Data(bytes) => assert_eq!(bytes.len(), 40),
            other => panic!("expected the large chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_write_after_completion_is_rejected() {
        let (output, _) = buffer(8);
        output.write_completed().unwrap();
        output.write_completed().unwrap();
        assert!(matches!(
            output.write(b"late"),
            Err(TransportError::Internal(_))
        ));
    }
}
