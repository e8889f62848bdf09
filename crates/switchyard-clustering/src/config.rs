//! Clustering configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ClusteringError, ClusteringResult};
use crate::strategy::FailoverStrategy;

/// Which failover strategy to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Walk the alternates once, in order
    #[default]
    Sequential,
    /// Retry each alternate `max_retries` more times before moving on
    RetryOnSameAddress,
    /// Pick alternates in random order
    Random,
}

/// Failover configuration for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Strategy used to pick alternates
    pub strategy: StrategyKind,
    /// Extra attempts per alternate, for [`StrategyKind::RetryOnSameAddress`]
    pub max_retries: Option<u32>,
    /// Statically configured alternate addresses; when empty the endpoint
    /// provider is asked instead
    pub alternate_addresses: Vec<String>,
    /// Placeholder address replaced by the first alternate on first use
    pub client_bootstrap_address: Option<String>,
    /// Only fail over when the server reported the service unavailable
    pub support_not_available_errors_only: bool,
    /// Pause before each resubmission
    pub delay_between_retries: Duration,
    /// Per-address circuit breakers; disabled when absent
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Sequential,
            max_retries: None,
            alternate_addresses: Vec::new(),
            client_bootstrap_address: None,
            support_not_available_errors_only: false,
            delay_between_retries: Duration::ZERO,
            circuit_breaker: None,
        }
    }
}

impl ClusteringConfig {
    /// Sequential failover over the given addresses.
    pub fn with_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            alternate_addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the strategy.
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Retry each alternate `max_retries` more times before moving on.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.strategy = StrategyKind::RetryOnSameAddress;
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the pause before each resubmission.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_between_retries = delay;
        self
    }

    /// Enables per-address circuit breakers.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Checks the settings for consistency.
    pub fn validate(&self) -> ClusteringResult<()> {
        match (self.strategy, self.max_retries) {
            (StrategyKind::RetryOnSameAddress, None) => {
                return Err(ClusteringError::InvalidConfiguration(
                    "retry_on_same_address requires max_retries".to_string(),
                ));
            }
            (StrategyKind::Sequential | StrategyKind::Random, Some(_)) => {
                return Err(ClusteringError::InvalidConfiguration(format!(
                    "max_retries is only valid with retry_on_same_address, not {:?}",
                    self.strategy
                )));
            }
            _ => {}
        }
        if let Some(address) = self.alternate_addresses.iter().find(|a| a.trim().is_empty()) {
            return Err(ClusteringError::InvalidConfiguration(format!(
                "blank alternate address {address:?}"
            )));
        }
        if self.client_bootstrap_address.is_some() && self.alternate_addresses.is_empty() {
            return Err(ClusteringError::InvalidConfiguration(
                "client_bootstrap_address requires alternate_addresses".to_string(),
            ));
        }
        if let Some(breaker) = &self.circuit_breaker
            && (breaker.failure_threshold == 0
                || breaker.success_threshold == 0
                || breaker.rolling_window_size == 0)
        {
            return Err(ClusteringError::InvalidConfiguration(
                "circuit breaker thresholds and window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the configured strategy.
    pub fn build_strategy(&self) -> ClusteringResult<FailoverStrategy> {
        self.validate()?;
        let strategy = match self.strategy {
            StrategyKind::Sequential => FailoverStrategy::sequential(),
            StrategyKind::RetryOnSameAddress => {
                FailoverStrategy::retry_on_same_address(self.max_retries.unwrap_or_default())
            }
            StrategyKind::Random => FailoverStrategy::random(),
        };
        Ok(strategy
            .with_addresses(self.alternate_addresses.iter().map(String::as_str))
            .with_delay(self.delay_between_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_valid_sequential() {
        let config = ClusteringConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.build_strategy().unwrap().name(), "sequential");
    }

    #[test]
    fn test_retry_requires_max_retries() {
        let config = ClusteringConfig::default().with_strategy(StrategyKind::RetryOnSameAddress);
        assert!(matches!(
            config.validate(),
            Err(ClusteringError::InvalidConfiguration(_))
        ));
        let config = ClusteringConfig::default().with_retries(2);
        assert_eq!(config.build_strategy().unwrap().name(), "retry_on_same_address");
    }

    #[test]
    fn test_max_retries_rejected_for_other_strategies() {
        let config = ClusteringConfig {
            max_retries: Some(1),
            ..ClusteringConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_needs_alternates() {
        let config = ClusteringConfig {
            client_bootstrap_address: Some("http://bootstrap".to_string()),
            ..ClusteringConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let parsed: Result<ClusteringConfig, _> =
            serde_json::from_str(r#"{"strategy": "round_robin"}"#);
        assert!(parsed.is_err());

        let parsed: ClusteringConfig =
            serde_json::from_str(r#"{"strategy": "random", "alternate_addresses": ["http://b"]}"#)
                .unwrap();
        assert_eq!(parsed.strategy, StrategyKind::Random);
        assert_eq!(parsed.alternate_addresses, vec!["http://b".to_string()]);
    }

    #[test]
    fn test_delay_is_carried_to_strategy() {
        let strategy = ClusteringConfig::default()
            .with_delay(Duration::from_millis(25))
            .build_strategy()
            .unwrap();
        assert_eq!(strategy.delay_between_retries(), Duration::from_millis(25));
    }
}
