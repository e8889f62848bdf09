//! Failover target selection.
//!
//! A [`TargetSelector`] sits between a client and its conduits. `prepare`
//! records the invocation so it can be replayed, `select_conduit` hands out
//! the conduit for the live endpoint, and `complete` decides whether a failed
//! exchange is retried against an alternate endpoint.

use std::sync::Arc;
use std::thread;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use switchyard_core::{
    CallContext, Conduit, ConduitInitiator, Endpoint, EndpointProvider, Exchange, Fault,
    InvocationId, Message,
};
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::ClusteringConfig;
use crate::error::{ClusteringError, ClusteringResult};
use crate::invocation::{InvocationContext, InvocationTable};
use crate::metrics::{FailoverMetrics, FailoverMetricsSnapshot};
use crate::strategy::{AlternateList, Strategy};

type SharedConduit = Arc<dyn Conduit>;

/// Chooses the conduit for each exchange and fails over to alternate
/// endpoints after transport failures.
///
/// One selector serves one client. Any number of threads may run
/// invocations through it at once; at most one conduit is selected at a time.
#[derive(Debug)]
pub struct TargetSelector {
    endpoint: RwLock<Endpoint>,
    selected: ArcSwapOption<SharedConduit>,
    provider: Arc<dyn EndpointProvider>,
    initiator: Arc<dyn ConduitInitiator>,
    strategy: Arc<dyn Strategy>,
    config: ClusteringConfig,
    invocations: InvocationTable,
    breakers: Option<CircuitBreakerRegistry>,
    metrics: FailoverMetrics,
}

impl TargetSelector {
    /// Creates a selector for `endpoint` using the strategy `config` names.
    pub fn new(
        endpoint: Endpoint,
        provider: Arc<dyn EndpointProvider>,
        initiator: Arc<dyn ConduitInitiator>,
        config: ClusteringConfig,
    ) -> ClusteringResult<Self> {
        let strategy = Arc::new(config.build_strategy()?);
        let breakers = config
            .circuit_breaker
            .clone()
            .map(CircuitBreakerRegistry::new);
        debug!(endpoint = %endpoint, strategy = strategy.name(), "Created target selector");
        Ok(Self {
            endpoint: RwLock::new(endpoint),
            selected: ArcSwapOption::empty(),
            provider,
            initiator,
            strategy,
            config,
            invocations: InvocationTable::default(),
            breakers,
            metrics: FailoverMetrics::new(),
        })
    }

    /// Replaces the configured strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// The endpoint requests currently go to.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.read().clone()
    }

    /// The failover strategy in use.
    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    /// The clustering configuration.
    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Per-address circuit breakers, when enabled.
    pub fn circuit_breakers(&self) -> Option<&CircuitBreakerRegistry> {
        self.breakers.as_ref()
    }

    /// Snapshot of the failover counters.
    pub fn metrics(&self) -> FailoverMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Invocations prepared but not yet finished.
    pub fn pending_invocations(&self) -> usize {
        self.invocations.len()
    }

    /// Records the invocation carried by `exchange` so it can be replayed.
    ///
    /// Messages without parameters are not replayable and are left alone.
    pub fn prepare(&self, exchange: &mut Exchange) {
        let Some(params) = exchange.out_message.params.clone() else {
            return;
        };
        let Some(operation) = exchange.operation.clone() else {
            return;
        };
        self.apply_bootstrap_address(&mut exchange.out_message);
        exchange.complete_if_service_not_available = true;

        let id = exchange.ensure_invocation_id();
        let message = &exchange.out_message;
        self.invocations.insert_if_absent(id, || {
            let endpoint = self.endpoint();
            let original_address = self.target_address(message, &endpoint);
            debug!(invocation = %id, operation = %operation.name, address = %original_address, "Recorded invocation");
            InvocationContext {
                original_endpoint: endpoint,
                original_address,
                operation,
                params,
                context: message.context.clone(),
                alternates: None,
            }
        });
    }

    /// Replaces a target address equal to the client bootstrap address with
    /// the first configured alternate.
    fn apply_bootstrap_address(&self, message: &mut Message) {
        let Some(bootstrap) = &self.config.client_bootstrap_address else {
            return;
        };
        let Some(first) = self.config.alternate_addresses.first() else {
            return;
        };
        let live = self.endpoint();
        if &self.target_address(message, &live) != bootstrap {
            return;
        }
        info!(bootstrap = %bootstrap, address = %first, "Replacing client bootstrap address");
        message.address = Some(first.clone());
        if message.context.endpoint_address().is_some() {
            message.context.set_endpoint_address(first);
        }
        if live.address() == bootstrap {
            self.switch_endpoint(live.with_address(first.as_str()));
        }
    }

    fn target_address(&self, message: &Message, endpoint: &Endpoint) -> String {
        message
            .address
            .as_deref()
            .or_else(|| message.context.endpoint_address())
            .unwrap_or_else(|| endpoint.address())
            .to_string()
    }

    /// Returns the conduit `message` should be sent through.
    ///
    /// A conduit set on the message wins. Otherwise the selected conduit is
    /// returned, created for the live endpoint on first use.
    pub fn select_conduit(&self, message: &Message) -> ClusteringResult<Arc<dyn Conduit>> {
        if let Some(conduit) = &message.conduit {
            return Ok(Arc::clone(conduit));
        }
        if let Some(selected) = self.selected.load_full() {
            return Ok(Arc::clone(&*selected));
        }

        let endpoint = self.endpoint();
        let created = self
            .initiator
            .get_conduit(&endpoint)
            .map_err(|source| ClusteringError::ConduitUnavailable {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let created = Arc::new(created);
        let none: Option<Arc<SharedConduit>> = None;
        let previous = self
            .selected
            .compare_and_swap(&none, Some(Arc::clone(&created)));
        match &*previous {
            None => {
                debug!(endpoint = %endpoint, "Selected conduit");
                Ok(Arc::clone(&*created))
            }
            Some(existing) => {
                // Lost the race to another thread
                created.close();
                Ok(Arc::clone(&**existing))
            }
        }
    }

    /// Finishes an exchange, failing over when a transport failure allows it.
    pub fn complete(&self, exchange: &mut Exchange) {
        let Some(id) = exchange
            .invocation_id()
            .filter(|id| self.invocations.contains(id))
        else {
            self.do_complete(exchange);
            return;
        };

        let attempted = self.attempted_address(exchange);
        let mut failover = false;
        if self.requires_failover(exchange) {
            self.on_failure(&attempted);
            exchange.out_message.conduit = None;
            match self.next_target(&id) {
                Some(next) => failover = self.perform_failover(exchange, id, next),
                None => self.exhausted(exchange, &id),
            }
        } else {
            self.on_success(exchange, &attempted);
        }

        if !failover {
            self.invocations.remove(&id);
            self.do_complete(exchange);
        }
    }

    /// Address the finished attempt went to. Another invocation may have
    /// moved the live endpoint since.
    fn attempted_address(&self, exchange: &Exchange) -> String {
        match &exchange.endpoint {
            Some(endpoint) => self.target_address(&exchange.out_message, endpoint),
            None => self.target_address(&exchange.out_message, &self.endpoint()),
        }
    }

    fn requires_failover(&self, exchange: &Exchange) -> bool {
        if self.config.support_not_available_errors_only && exchange.response_code.is_some() {
            return exchange.service_not_available;
        }
        exchange
            .effective_fault()
            .is_some_and(Fault::is_transport_failure)
    }

    /// Next alternate for invocation `id`.
    ///
    /// The list is computed on first use relative to the endpoint the
    /// invocation started on, and discarded once the strategy is exhausted.
    fn next_target(&self, id: &InvocationId) -> Option<Endpoint> {
        let (stored, original) = self
            .invocations
            .update(id, |ctx| (ctx.alternates.take(), ctx.original_endpoint.clone()))?;
        let mut alternates = match stored {
            Some(alternates) => alternates,
            None => {
                let mut alternates = self
                    .strategy
                    .alternate_endpoints(&original, self.provider.as_ref());
                if let Some(breakers) = &self.breakers {
                    alternates.retain(|endpoint| {
                        let allowed = breakers.allows(endpoint.address());
                        if !allowed {
                            debug!(endpoint = %endpoint, "Skipping alternate with open circuit");
                        }
                        allowed
                    });
                }
                AlternateList::new(alternates)
            }
        };

        let next = self.strategy.select_next(&mut alternates);
        if next.is_some() {
            self.invocations
                .update(id, |ctx| ctx.alternates = Some(alternates));
        }
        next
    }

    /// Switches to `next` and resubmits the invocation.
    ///
    /// Returns true if the retried invocation reached its own completion;
    /// otherwise the caller finalises it.
    fn perform_failover(&self, exchange: &mut Exchange, id: InvocationId, next: Endpoint) -> bool {
        let Some(invocation) = self.invocations.update(&id, |ctx| {
            override_address(&mut ctx.context, &next, &ctx.original_address);
            ctx.clone()
        }) else {
            return false;
        };

        let previous = self.switch_endpoint(next.clone());
        info!(
            invocation = %id,
            from = %previous,
            to = %next,
            strategy = self.strategy.name(),
            "Failing over to alternate endpoint"
        );

        let saved_exchange_fault = exchange.fault.take();
        let saved_message_fault = exchange.out_message.fault.take();
        let retry = exchange.retryable.clone();
        exchange.clear();

        let Some(retry) = retry else {
            warn!(invocation = %id, "Exchange has no retryable client; cannot fail over");
            exchange.fault = saved_exchange_fault;
            exchange.out_message.fault = saved_message_fault;
            return false;
        };

        let delay = self.strategy.delay_between_retries();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        self.metrics.record_failover_attempt();
        match retry.invoke(
            &invocation.operation,
            &invocation.params,
            &invocation.context,
            exchange,
        ) {
            Ok(()) => exchange.completed,
            Err(err) => {
                self.metrics.record_failed_retry();
                warn!(invocation = %id, endpoint = %next, error = %err, "Failover retry failed");
                exchange.fault = saved_exchange_fault;
                exchange.out_message.fault = saved_message_fault;
                exchange.completed
            }
        }
    }

    fn exhausted(&self, exchange: &mut Exchange, id: &InvocationId) {
        self.metrics.record_exhausted();
        exchange.complete_if_service_not_available = false;

        let Some(invocation) = self.invocations.get(id) else {
            return;
        };
        let live = self.endpoint();
        if live != invocation.original_endpoint {
            self.switch_endpoint(invocation.original_endpoint.clone());
            warn!(
                invocation = %id,
                endpoint = %invocation.original_endpoint,
                "No alternate endpoint left; reverted to original endpoint"
            );
        } else {
            warn!(invocation = %id, endpoint = %live, "No alternate endpoint available");
        }
    }

    /// Makes `endpoint` live and releases the selected conduit. Returns the
    /// previous endpoint.
    fn switch_endpoint(&self, endpoint: Endpoint) -> Endpoint {
        let mut live = self.endpoint.write();
        if *live == endpoint {
            return endpoint;
        }
        let previous = std::mem::replace(&mut *live, endpoint);
        drop(live);
        if let Some(old) = self.selected.swap(None) {
            old.close();
        }
        previous
    }

    fn on_failure(&self, address: &str) {
        self.metrics.record_transport_failure();
        if let Some(breakers) = &self.breakers
            && breakers.record_failure(address)
        {
            self.metrics.record_circuit_trip();
        }
    }

    fn on_success(&self, exchange: &Exchange, address: &str) {
        if exchange.effective_fault().is_some() {
            self.metrics.record_non_retryable();
        }
        if let Some(breakers) = &self.breakers {
            breakers.record_success(address);
        }
    }

    fn do_complete(&self, exchange: &mut Exchange) {
        exchange.completed = true;
        self.metrics.record_completion();
        if exchange.in_message.is_none() {
            return;
        }
        let conduit = exchange
            .out_message
            .conduit
            .clone()
            .or_else(|| self.selected.load_full().map(|c| Arc::clone(&*c)));
        if let Some(conduit) = conduit {
            conduit.complete(exchange);
        }
    }
}

/// Points the request context at `next`, remembering the original target.
fn override_address(context: &mut CallContext, next: &Endpoint, original: &str) {
    context
        .request
        .entry(CallContext::ORIGINAL_ADDRESS.to_string())
        .or_insert_with(|| serde_json::Value::String(original.to_string()));
    context.set_endpoint_address(next.address());
}

impl Drop for TargetSelector {
    fn drop(&mut self) {
        if let Some(conduit) = self.selected.swap(None) {
            conduit.close();
        }
    }
}

