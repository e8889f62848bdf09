//! Per-address circuit breakers.
//!
//! Each address gets its own breaker. A breaker trips open once enough
//! consecutive failures have been seen within its rolling window, stays open
//! for `open_timeout`, and then lets traffic through half-open until enough
//! successes close it again. Failover strategies skip addresses whose breaker
//! is open.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Successes in half-open state that close it again
    pub success_threshold: u32,
    /// Time spent open before trying half-open
    pub open_timeout: Duration,
    /// Number of recent outcomes kept per address
    pub rolling_window_size: usize,
    /// Outcomes required in the window before the circuit may open
    pub minimum_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            open_timeout: Duration::from_secs(30),
            rolling_window_size: 20,
            minimum_requests: 3,
        }
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,
    /// Failing fast; the address is skipped
    Open,
    /// Trial calls decide whether the address recovered
    HalfOpen,
}

/// Point-in-time view of one address's breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures while closed
    pub failure_count: u32,
    /// Successes while half-open
    pub success_count: u32,
    /// Failure rate over the rolling window (0.0 - 1.0)
    pub failure_rate: f64,
    /// Time spent in the current state
    pub time_in_current_state: Duration,
}

#[derive(Debug)]
struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_state_change: Instant,
    window: VecDeque<bool>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_state_change: Instant::now(),
            window: VecDeque::new(),
        }
    }

    fn allows(&mut self, config: &CircuitBreakerConfig) -> bool {
        if self.state == CircuitState::Open
            && self.last_state_change.elapsed() >= config.open_timeout
        {
            self.transition(CircuitState::HalfOpen);
        }
        self.state != CircuitState::Open
    }

    /// Returns the new state when the outcome changed it.
    fn record(&mut self, success: bool, config: &CircuitBreakerConfig) -> Option<CircuitState> {
        self.window.push_back(success);
        while self.window.len() > config.rolling_window_size {
            self.window.pop_front();
        }

        match self.state {
            CircuitState::Closed if success => self.failure_count = 0,
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.window.len() as u32 >= config.minimum_requests
                    && self.failure_count >= config.failure_threshold
                {
                    self.transition(CircuitState::Open);
                    return Some(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if success => {
                self.success_count += 1;
                if self.success_count >= config.success_threshold {
                    self.transition(CircuitState::Closed);
                    return Some(CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(CircuitState::Open);
                return Some(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
        None
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.failure_count = 0;
        self.success_count = 0;
        self.last_state_change = Instant::now();
    }

    fn stats(&self) -> CircuitBreakerStats {
        let failure_rate = if self.window.is_empty() {
            0.0
        } else {
            let failures = self.window.iter().filter(|ok| !**ok).count();
            failures as f64 / self.window.len() as f64
        };
        CircuitBreakerStats {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            failure_rate,
            time_in_current_state: self.last_state_change.elapsed(),
        }
    }
}

/// Circuit breakers keyed by endpoint address.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Whether requests to `address` may be attempted.
    ///
    /// An open breaker whose timeout elapsed moves to half-open here.
    pub fn allows(&self, address: &str) -> bool {
        let mut breakers = self.breakers.lock();
        match breakers.get_mut(address) {
            Some(breaker) => breaker.allows(&self.config),
            None => true,
        }
    }

    /// Records a successful call to `address`.
    pub fn record_success(&self, address: &str) {
        if let Some(CircuitState::Closed) = self.record(address, true) {
            info!(address, "Circuit closed");
        }
    }

    /// Records a failed call to `address`; returns true if this tripped the
    /// breaker open.
    pub fn record_failure(&self, address: &str) -> bool {
        let tripped = self.record(address, false) == Some(CircuitState::Open);
        if tripped {
            warn!(address, open_for = ?self.config.open_timeout, "Circuit opened");
        }
        tripped
    }

    fn record(&self, address: &str, success: bool) -> Option<CircuitState> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(address.to_string())
            .or_insert_with(CircuitBreaker::new)
            .record(success, &self.config)
    }

    /// Current state of `address`'s breaker.
    pub fn state(&self, address: &str) -> CircuitState {
        self.breakers
            .lock()
            .get(address)
            .map_or(CircuitState::Closed, |b| b.state)
    }

    /// Statistics for `address`, if it has been seen.
    pub fn stats(&self, address: &str) -> Option<CircuitBreakerStats> {
        self.breakers.lock().get(address).map(CircuitBreaker::stats)
    }

    /// Forgets everything recorded for `address`.
    pub fn reset(&self, address: &str) {
        self.breakers.lock().remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const A: &str = "http://a:8080/svc";

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            minimum_requests: 2,
            ..CircuitBreakerConfig::default()
        }
    }

    #[test]
    fn test_unknown_address_is_allowed() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        assert!(registry.allows(A));
        assert_eq!(registry.state(A), CircuitState::Closed);
        assert!(registry.stats(A).is_none());
    }

    #[test]
    fn test_trips_after_consecutive_failures() {
        let registry = CircuitBreakerRegistry::new(config());
        assert!(!registry.record_failure(A));
        assert!(registry.record_failure(A));

        assert_eq!(registry.state(A), CircuitState::Open);
        assert!(!registry.allows(A));
        assert!(registry.allows("http://b:8080/svc"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let registry = CircuitBreakerRegistry::new(config());
        registry.record_failure(A);
        registry.record_success(A);
        assert!(!registry.record_failure(A));
        assert_eq!(registry.state(A), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_recovery() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            minimum_requests: 1,
            success_threshold: 2,
            open_timeout: Duration::from_millis(50),
            ..CircuitBreakerConfig::default()
        });
        registry.record_failure(A);
        assert!(!registry.allows(A));

        std::thread::sleep(Duration::from_millis(80));
        assert!(registry.allows(A));
        assert_eq!(registry.state(A), CircuitState::HalfOpen);

        registry.record_success(A);
        assert_eq!(registry.state(A), CircuitState::HalfOpen);
        registry.record_success(A);
        assert_eq!(registry.state(A), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            minimum_requests: 1,
            open_timeout: Duration::from_millis(20),
            ..CircuitBreakerConfig::default()
        });
        registry.record_failure(A);
        std::thread::sleep(Duration::from_millis(40));
        assert!(registry.allows(A));
        assert!(registry.record_failure(A));
        assert!(!registry.allows(A));
    }

    #[test]
    fn test_stats_and_reset() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        registry.record_success(A);
        registry.record_failure(A);

        let stats = registry.stats(A).unwrap();
        assert_eq!(stats.failure_rate, 0.5);
        assert_eq!(stats.failure_count, 1);

        registry.reset(A);
        assert!(registry.stats(A).is_none());
    }
}
