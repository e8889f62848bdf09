//! Failover counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free failover counters shared by one selector.
#[derive(Debug, Default)]
pub struct FailoverMetrics {
    /// Invocations that completed (successfully or not)
    pub completions: AtomicU64,
    /// Failures eligible for failover
    pub transport_failures: AtomicU64,
    /// Failures surfaced without failover
    pub non_retryable_failures: AtomicU64,
    /// Retries submitted against an alternate endpoint
    pub failover_attempts: AtomicU64,
    /// Retries whose resubmission itself failed
    pub failed_retries: AtomicU64,
    /// Invocations that ran out of alternates
    pub exhausted: AtomicU64,
    /// Circuit breakers tripped open
    pub circuit_trips: AtomicU64,
}

/// Snapshot of [`FailoverMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverMetricsSnapshot {
    /// Invocations that completed
    pub completions: u64,
    /// Failures eligible for failover
    pub transport_failures: u64,
    /// Failures surfaced without failover
    pub non_retryable_failures: u64,
    /// Retries submitted against an alternate endpoint
    pub failover_attempts: u64,
    /// Retries whose resubmission failed
    pub failed_retries: u64,
    /// Invocations that ran out of alternates
    pub exhausted: u64,
    /// Circuit breakers tripped open
    pub circuit_trips: u64,
}

impl FailoverMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_completion(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_non_retryable(&self) {
        self.non_retryable_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failover_attempt(&self) {
        self.failover_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_retry(&self) {
        self.failed_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_trip(&self) {
        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values.
    pub fn snapshot(&self) -> FailoverMetricsSnapshot {
        FailoverMetricsSnapshot {
            completions: self.completions.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            non_retryable_failures: self.non_retryable_failures.load(Ordering::Relaxed),
            failover_attempts: self.failover_attempts.load(Ordering::Relaxed),
            failed_retries: self.failed_retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            circuit_trips: self.circuit_trips.load(Ordering::Relaxed),
        }
    }
}

impl FailoverMetricsSnapshot {
    /// Share of failover attempts whose resubmission went through (0.0 - 1.0).
    pub fn retry_success_rate(&self) -> f64 {
        if self.failover_attempts == 0 {
            0.0
        } else {
            let ok = self.failover_attempts.saturating_sub(self.failed_retries);
            ok as f64 / self.failover_attempts as f64
        }
    }
}
