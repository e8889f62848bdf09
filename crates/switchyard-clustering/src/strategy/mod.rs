//! Failover strategies: which endpoint to try next after a transport failure.

mod static_list;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use switchyard_core::{Endpoint, EndpointProvider};
use tracing::debug;

use static_list::StaticList;

/// Picks alternate endpoints for a failed invocation.
///
/// The selector computes the alternate list once per invocation with
/// [`Strategy::alternate_endpoints`] and then calls [`Strategy::select_next`]
/// on each further failure, passing that invocation's [`AlternateList`] back
/// in. An empty result means the strategy is exhausted.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Endpoints that could stand in for `current`, in the order to try them.
    fn alternate_endpoints(
        &self,
        current: &Endpoint,
        provider: &dyn EndpointProvider,
    ) -> Vec<Endpoint>;

    /// Next endpoint to try; may consume entries of `alternates`.
    fn select_next(&self, alternates: &mut AlternateList) -> Option<Endpoint>;

    /// Pause before resubmitting.
    fn delay_between_retries(&self) -> Duration {
        Duration::ZERO
    }

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// The built-in strategies.
#[derive(Debug)]
pub enum FailoverStrategy {
    /// Each alternate once, in order.
    Sequential(Alternates),
    /// Each alternate `max_retries + 1` times in a row, in order.
    RetryOnSameAddress(RetryOnSameAddress),
    /// Each alternate once, in random order.
    Random(Alternates),
}

/// Alternate source and retry delay shared by every built-in strategy.
#[derive(Debug, Clone, Default)]
pub struct Alternates {
    list: StaticList,
    delay: Duration,
}

/// Alternates left for one invocation.
///
/// Lives with the invocation, so strategies stay stateless and concurrent
/// invocations never see each other's progress.
#[derive(Debug, Clone, Default)]
pub struct AlternateList {
    endpoints: Vec<Endpoint>,
    /// Times the head of the list has been handed out
    served: u32,
}

impl AlternateList {
    /// Wraps a freshly enumerated list.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            served: 0,
        }
    }

    /// Endpoints not yet consumed.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Number of endpoints left.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether nothing is left.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Times the current head has been handed out.
    pub fn served(&self) -> u32 {
        self.served
    }

    /// Removes and returns the head.
    pub fn take_first(&mut self) -> Option<Endpoint> {
        self.take(0)
    }

    /// Removes and returns a uniformly random entry.
    pub fn take_random(&mut self) -> Option<Endpoint> {
        self.take(fastrand::usize(..self.endpoints.len().max(1)))
    }

    fn take(&mut self, index: usize) -> Option<Endpoint> {
        if index >= self.endpoints.len() {
            return None;
        }
        self.served = 0;
        Some(self.endpoints.remove(index))
    }

    /// Hands out the head again without consuming it.
    pub fn serve_first(&mut self) -> Option<Endpoint> {
        let next = self.endpoints.first()?.clone();
        self.served += 1;
        Some(next)
    }
}

impl From<Vec<Endpoint>> for AlternateList {
    fn from(endpoints: Vec<Endpoint>) -> Self {
        Self::new(endpoints)
    }
}

/// State of [`FailoverStrategy::RetryOnSameAddress`].
#[derive(Debug)]
pub struct RetryOnSameAddress {
    base: Alternates,
    max_retries: u32,
}

impl RetryOnSameAddress {
    /// Extra attempts per alternate.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn select_next(&self, alternates: &mut AlternateList) -> Option<Endpoint> {
        if alternates.served() > self.max_retries {
            alternates.take_first();
        }
        let next = alternates.serve_first()?;
        debug!(
            endpoint = %next,
            attempt = alternates.served(),
            max = self.max_retries + 1,
            "Retrying alternate"
        );
        Some(next)
    }
}

impl FailoverStrategy {
    /// Walks the alternates once, in order.
    pub fn sequential() -> Self {
        Self::Sequential(Alternates::default())
    }

    /// Tries each alternate `max_retries` more times before moving on.
    pub fn retry_on_same_address(max_retries: u32) -> Self {
        Self::RetryOnSameAddress(RetryOnSameAddress {
            base: Alternates::default(),
            max_retries,
        })
    }

    /// Picks alternates uniformly at random, each once.
    pub fn random() -> Self {
        Self::Random(Alternates::default())
    }

    /// Uses these addresses as alternates instead of asking the provider.
    pub fn with_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.base_mut().list.set_addresses(addresses);
        self
    }

    /// Pauses for `delay` before each resubmission.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.base_mut().delay = delay;
        self
    }

    /// Statically configured alternate addresses.
    pub fn addresses(&self) -> &[Arc<str>] {
        self.base().list.addresses()
    }

    fn base(&self) -> &Alternates {
        match self {
            Self::Sequential(base) | Self::Random(base) => base,
            Self::RetryOnSameAddress(retry) => &retry.base,
        }
    }

    fn base_mut(&mut self) -> &mut Alternates {
        match self {
            Self::Sequential(base) | Self::Random(base) => base,
            Self::RetryOnSameAddress(retry) => &mut retry.base,
        }
    }
}

impl Default for FailoverStrategy {
    fn default() -> Self {
        Self::sequential()
    }
}

impl Strategy for FailoverStrategy {
    fn alternate_endpoints(
        &self,
        current: &Endpoint,
        provider: &dyn EndpointProvider,
    ) -> Vec<Endpoint> {
        self.base().list.alternates(current, provider)
    }

    fn select_next(&self, alternates: &mut AlternateList) -> Option<Endpoint> {
        match self {
            Self::Sequential(_) => alternates.take_first(),
            Self::Random(_) => alternates.take_random(),
            Self::RetryOnSameAddress(retry) => retry.select_next(alternates),
        }
    }

    fn delay_between_retries(&self) -> Duration {
        self.base().delay
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Sequential(_) => "sequential",
            Self::RetryOnSameAddress(_) => "retry_on_same_address",
            Self::Random(_) => "random",
        }
    }
}
