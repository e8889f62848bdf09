//! Transport metrics types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of a transport's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportMetrics {
    /// Total number of body bytes sent.
    pub bytes_sent: u64,

    /// Total number of body bytes received.
    pub bytes_received: u64,

    /// Requests handed to the transport.
    pub requests_sent: u64,

    /// Response heads received.
    pub responses_received: u64,

    /// Connection attempts.
    pub connections: u64,

    /// Failed connection attempts.
    pub failed_connections: u64,

    /// Requests replayed from the retransmission cache.
    pub retransmissions: u64,

    /// Requests that ran out of time waiting for a response.
    pub timeouts: u64,

    /// Requests executed on the caller thread instead of the reactor.
    pub direct_requests: u64,

    /// The average round-trip latency, in milliseconds.
    pub average_latency_ms: f64,
}

/// Lock-free counters updated on the hot path.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    /// Body bytes sent.
    pub bytes_sent: AtomicU64,

    /// Body bytes received.
    pub bytes_received: AtomicU64,

    /// Requests handed to the transport.
    pub requests_sent: AtomicU64,

    /// Response heads received.
    pub responses_received: AtomicU64,

    /// Connection attempts.
    pub connections: AtomicU64,

    /// Failed connection attempts.
    pub failed_connections: AtomicU64,

    /// Replayed requests.
    pub retransmissions: AtomicU64,

    /// Receive or connect timeouts.
    pub timeouts: AtomicU64,

    /// Requests executed on the caller thread.
    pub direct_requests: AtomicU64,

    /// Exponential moving average of the round trip, in microseconds.
    avg_latency_us: AtomicU64,
}

impl AtomicMetrics {
    /// Creates a new instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates the average latency using an exponential moving average.
    pub fn update_latency_us(&self, latency_us: u64) {
        let current = self.avg_latency_us.load(Ordering::Relaxed);
        let new_avg = if current == 0 {
            latency_us
        } else {
            // alpha = 0.1, saturating so multi-second stalls cannot overflow
            current.saturating_mul(9).saturating_add(latency_us) / 10
        };
        self.avg_latency_us.store(new_avg, Ordering::Relaxed);
    }

    /// Creates a serializable snapshot of the current values.
    pub fn snapshot(&self) -> TransportMetrics {
        TransportMetrics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            direct_requests: self.direct_requests.load(Ordering::Relaxed),
            average_latency_ms: (self.avg_latency_us.load(Ordering::Relaxed) as f64) / 1000.0,
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.bytes_sent,
            &self.bytes_received,
            &self.requests_sent,
            &self.responses_received,
            &self.connections,
            &self.failed_connections,
            &self.retransmissions,
            &self.timeouts,
            &self.direct_requests,
            &self.avg_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
