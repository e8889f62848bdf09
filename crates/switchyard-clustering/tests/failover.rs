//! Failover behaviour of `TargetSelector` against scripted conduits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use switchyard_clustering::{CircuitBreakerConfig, CircuitState, ClusteringConfig, TargetSelector};
use switchyard_core::{
    ApplicationFault, BindingKey, CallContext, Conduit, ConduitInitiator, Endpoint, Exchange,
    Fault, Message, Operation, Retryable, StaticServiceRegistry, TransportError,
    TransportResult,
};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Refuse,
    Answer(u16),
}

#[derive(Debug)]
struct ScriptedConduit {
    target: Endpoint,
    behavior: Behavior,
    sends: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl Conduit for ScriptedConduit {
    fn target(&self) -> &Endpoint {
        &self.target
    }

    fn send(&self, exchange: &mut Exchange) -> TransportResult<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let address = self.target.address().to_string();
        match self.behavior {
            Behavior::Refuse => Err(TransportError::ConnectionFailed(format!("{address}: refused"))),
            Behavior::Answer(status) => {
                exchange.response_code = Some(status);
                let mut inbound = Message::new();
                inbound.payload = address.clone().into();
                exchange.in_message = Some(inbound);
                if exchange.complete_if_service_not_available && matches!(status, 404 | 503) {
                    exchange.service_not_available = true;
                    return Err(TransportError::ServiceNotAvailable { address, status });
                }
                if status >= 400 && status != 500 {
                    return Err(TransportError::ProtocolError(format!("HTTP {status}")));
                }
                Ok(())
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct ScriptedInitiator {
    behaviors: HashMap<String, Behavior>,
    sends: Mutex<HashMap<String, Arc<AtomicUsize>>>,
    created: Mutex<Vec<Arc<ScriptedConduit>>>,
}

impl ScriptedInitiator {
    fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .iter()
                .map(|(address, behavior)| (address.to_string(), *behavior))
                .collect(),
            ..Self::default()
        })
    }

    fn sends(&self, address: &str) -> usize {
        self.sends
            .lock()
            .get(address)
            .map_or(0, |count| count.load(Ordering::SeqCst))
    }

    fn created(&self) -> Vec<String> {
        self.created
            .lock()
            .iter()
            .map(|c| c.target.address().to_string())
            .collect()
    }
}

impl ConduitInitiator for ScriptedInitiator {
    fn get_conduit(&self, endpoint: &Endpoint) -> TransportResult<Arc<dyn Conduit>> {
        let behavior = self
            .behaviors
            .get(endpoint.address())
            .copied()
            .unwrap_or(Behavior::Refuse);
        let sends = Arc::clone(
            self.sends
                .lock()
                .entry(endpoint.address().to_string())
                .or_default(),
        );
        let conduit = Arc::new(ScriptedConduit {
            target: endpoint.clone(),
            behavior,
            sends,
            closed: AtomicBool::new(false),
        });
        self.created.lock().push(Arc::clone(&conduit));
        Ok(conduit)
    }
}

/// Minimal retry-capable client: prepare, send, complete.
#[derive(Debug)]
struct TestClient {
    selector: TargetSelector,
    me: Weak<TestClient>,
}

impl TestClient {
    fn new(selector: TargetSelector) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            selector,
            me: me.clone(),
        })
    }

    fn call(&self, operation: &str) -> Result<Exchange, (Exchange, Fault)> {
        let mut exchange = Exchange::default();
        let result = self.invoke(
            &Operation::new(operation),
            &[serde_json::json!("ada")],
            &CallContext::new(),
            &mut exchange,
        );
        match result {
            Ok(()) => Ok(exchange),
            Err(fault) => Err((exchange, fault)),
        }
    }
}

impl Retryable for TestClient {
    fn invoke(
        &self,
        operation: &Operation,
        params: &[serde_json::Value],
        context: &CallContext,
        exchange: &mut Exchange,
    ) -> Result<(), Fault> {
        exchange.endpoint = Some(self.selector.endpoint());
        exchange.operation = Some(operation.clone());
        exchange.out_message.params = Some(params.to_vec());
        exchange.out_message.context = context.clone();
        exchange.retryable = self.me.upgrade().map(|me| me as Arc<dyn Retryable>);

        self.selector.prepare(exchange);
        match self.selector.select_conduit(&exchange.out_message) {
            Ok(conduit) => {
                if let Err(err) = conduit.send(exchange) {
                    exchange.out_message.fault = Some(err.into());
                } else if exchange.response_code == Some(500) {
                    exchange.out_message.fault =
                        Some(ApplicationFault::new("Server", "no such customer").into());
                }
            }
            Err(err) => exchange.out_message.fault = Some(Fault::new(err)),
        }
        self.selector.complete(exchange);

        match exchange.effective_fault() {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }
}

fn endpoint(name: &str, address: &str, binding: &str) -> Endpoint {
    Endpoint::new(name, address, BindingKey::new(binding))
}

fn registry(endpoints: &[Endpoint]) -> Arc<StaticServiceRegistry> {
    Arc::new(StaticServiceRegistry::new("greeter", endpoints.to_vec()))
}

#[test]
fn test_fails_over_to_compatible_endpoint() {
    let e1 = endpoint("e1", "http://a1/svc", "b1");
    let e2 = endpoint("e2", "http://a2/svc", "b1");
    let e3 = endpoint("e3", "http://a3/svc", "b2");
    let initiator = ScriptedInitiator::new(&[
        ("http://a1/svc", Behavior::Refuse),
        ("http://a2/svc", Behavior::Answer(200)),
        ("http://a3/svc", Behavior::Answer(200)),
    ]);
    let selector = TargetSelector::new(
        e1.clone(),
        registry(&[e1, e2, e3]),
        initiator.clone(),
        ClusteringConfig::default(),
    )
    .unwrap();
    let client = TestClient::new(selector);

    let exchange = client.call("greet").unwrap();
    assert_eq!(&exchange.in_message.unwrap().payload[..], b"http://a2/svc");
    assert_eq!(
        exchange.out_message.context.endpoint_address(),
        Some("http://a2/svc")
    );
    assert_eq!(
        exchange.out_message.context.request[CallContext::ORIGINAL_ADDRESS],
        serde_json::json!("http://a1/svc")
    );
    assert!(exchange.completed);

    assert_eq!(client.selector.endpoint().address(), "http://a2/svc");
    assert_eq!(initiator.created(), vec!["http://a1/svc", "http://a2/svc"]);
    assert!(initiator.created.lock()[0].is_closed());
    assert_eq!(initiator.sends("http://a3/svc"), 0);
    assert_eq!(client.selector.pending_invocations(), 0);

    let metrics = client.selector.metrics();
    assert_eq!(metrics.failover_attempts, 1);
    assert_eq!(metrics.transport_failures, 1);
    assert_eq!(metrics.failed_retries, 0);
}

#[test]
fn test_sequential_exhaustion_reverts_and_keeps_original_error() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
        endpoint("e3", "http://a3/svc", "b1"),
    ];
    let initiator = ScriptedInitiator::new(&[]);
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        initiator.clone(),
        ClusteringConfig::default(),
    )
    .unwrap();
    let client = TestClient::new(selector);

    let (exchange, fault) = client.call("greet").unwrap_err();
    assert!(fault.to_string().contains("http://a1/svc"), "{fault}");
    assert!(exchange.out_message.fault.unwrap().same_as(&fault));
    assert!(!exchange.complete_if_service_not_available);

    assert_eq!(initiator.sends("http://a1/svc"), 1);
    assert_eq!(initiator.sends("http://a2/svc"), 1);
    assert_eq!(initiator.sends("http://a3/svc"), 1);
    assert_eq!(client.selector.endpoint(), endpoints[0]);
    assert_eq!(client.selector.pending_invocations(), 0);

    let metrics = client.selector.metrics();
    assert_eq!(metrics.failover_attempts, 2);
    assert_eq!(metrics.failed_retries, 2);
    assert_eq!(metrics.exhausted, 1);
}

#[test]
fn test_retry_on_same_address_repeats_alternates() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
        endpoint("e3", "http://a3/svc", "b1"),
    ];
    let initiator = ScriptedInitiator::new(&[("http://a3/svc", Behavior::Answer(200))]);
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        initiator.clone(),
        ClusteringConfig::default().with_retries(2),
    )
    .unwrap();
    let client = TestClient::new(selector);

    client.call("greet").unwrap();
    assert_eq!(initiator.sends("http://a1/svc"), 1);
    assert_eq!(initiator.sends("http://a2/svc"), 3);
    assert_eq!(initiator.sends("http://a3/svc"), 1);
    assert_eq!(client.selector.endpoint().address(), "http://a3/svc");
}

#[test]
fn test_application_fault_does_not_fail_over() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
    ];
    let initiator = ScriptedInitiator::new(&[
        ("http://a1/svc", Behavior::Answer(500)),
        ("http://a2/svc", Behavior::Answer(200)),
    ]);
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        initiator.clone(),
        ClusteringConfig::default(),
    )
    .unwrap();
    let client = TestClient::new(selector);

    let (exchange, fault) = client.call("greet").unwrap_err();
    assert!(fault.find::<ApplicationFault>().is_some());
    assert!(exchange.completed);
    assert_eq!(client.selector.endpoint(), endpoints[0]);
    assert_eq!(initiator.sends("http://a2/svc"), 0);

    let metrics = client.selector.metrics();
    assert_eq!(metrics.failover_attempts, 0);
    assert_eq!(metrics.non_retryable_failures, 1);
}

#[derive(Debug)]
struct FailingRetry {
    fault: Fault,
}

impl Retryable for FailingRetry {
    fn invoke(
        &self,
        _operation: &Operation,
        _params: &[serde_json::Value],
        _context: &CallContext,
        exchange: &mut Exchange,
    ) -> Result<(), Fault> {
        exchange.fault = Some(self.fault.clone());
        exchange.out_message.fault = Some(self.fault.clone());
        Err(self.fault.clone())
    }
}

#[test]
fn test_failed_retry_restores_prior_faults() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
    ];
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        ScriptedInitiator::new(&[]),
        ClusteringConfig::default(),
    )
    .unwrap();

    let original: Fault = TransportError::ConnectionLost("reset by peer".to_string()).into();
    let outer: Fault = TransportError::Timeout.into();
    let retry_fault = Fault::new(std::io::Error::other("retry blew up"));

    let mut exchange = Exchange::new(endpoints[0].clone(), Operation::new("greet"));
    exchange.out_message.params = Some(vec![]);
    selector.prepare(&mut exchange);
    assert!(exchange.complete_if_service_not_available);
    assert_eq!(selector.pending_invocations(), 1);

    exchange.out_message.fault = Some(original.clone());
    exchange.fault = Some(outer.clone());
    exchange.retryable = Some(Arc::new(FailingRetry {
        fault: retry_fault.clone(),
    }));
    selector.complete(&mut exchange);

    assert!(exchange.out_message.fault.as_ref().unwrap().same_as(&original));
    assert!(exchange.fault.as_ref().unwrap().same_as(&outer));
    assert!(exchange.completed);
    assert_eq!(selector.pending_invocations(), 0);
    assert_eq!(selector.endpoint(), endpoints[1]);
    assert_eq!(selector.metrics().failed_retries, 1);
}

#[test]
fn test_unreplayable_message_is_completed_without_failover() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
    ];
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        ScriptedInitiator::new(&[]),
        ClusteringConfig::default(),
    )
    .unwrap();

    let mut exchange = Exchange::new(endpoints[0].clone(), Operation::new("raw"));
    selector.prepare(&mut exchange);
    assert!(exchange.invocation_id().is_none());
    assert!(!exchange.complete_if_service_not_available);

    exchange.out_message.fault = Some(TransportError::Timeout.into());
    selector.complete(&mut exchange);
    assert!(exchange.completed);
    assert_eq!(selector.endpoint(), endpoints[0]);
}

#[test]
fn test_static_addresses_and_client_bootstrap_address() {
    let bootstrap = endpoint("svc", "http://bootstrap/svc", "b1");
    let initiator = ScriptedInitiator::new(&[
        ("http://x/svc", Behavior::Refuse),
        ("http://y/svc", Behavior::Answer(200)),
    ]);
    let config = ClusteringConfig {
        client_bootstrap_address: Some("http://bootstrap/svc".to_string()),
        ..ClusteringConfig::with_addresses(["http://x/svc", "http://y/svc"])
    };
    let selector = TargetSelector::new(
        bootstrap.clone(),
        registry(&[bootstrap]),
        initiator.clone(),
        config,
    )
    .unwrap();
    let client = TestClient::new(selector);

    client.call("greet").unwrap();
    assert_eq!(initiator.created(), vec!["http://x/svc", "http://y/svc"]);
    assert_eq!(initiator.sends("http://bootstrap/svc"), 0);
    assert_eq!(client.selector.endpoint().address(), "http://y/svc");
    assert_eq!(client.selector.endpoint().name(), "svc");
}

#[test]
fn test_open_circuit_is_skipped() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
        endpoint("e3", "http://a3/svc", "b1"),
    ];
    let initiator = ScriptedInitiator::new(&[
        ("http://a2/svc", Behavior::Answer(200)),
        ("http://a3/svc", Behavior::Answer(200)),
    ]);
    let breaker = CircuitBreakerConfig {
        failure_threshold: 1,
        minimum_requests: 1,
        open_timeout: Duration::from_secs(60),
        ..CircuitBreakerConfig::default()
    };
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        initiator.clone(),
        ClusteringConfig::default().with_circuit_breaker(breaker),
    )
    .unwrap();
    assert!(selector.circuit_breakers().unwrap().record_failure("http://a2/svc"));
    let client = TestClient::new(selector);

    client.call("greet").unwrap();
    assert_eq!(initiator.sends("http://a2/svc"), 0);
    assert_eq!(client.selector.endpoint().address(), "http://a3/svc");
    assert!(!client.selector.circuit_breakers().unwrap().allows("http://a1/svc"));
    assert_eq!(client.selector.metrics().circuit_trips, 1);
}

#[test]
fn test_breaker_outcome_follows_attempted_address() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
        endpoint("e3", "http://a3/svc", "b1"),
    ];
    let initiator = ScriptedInitiator::new(&[("http://a2/svc", Behavior::Answer(200))]);
    let breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        minimum_requests: 1,
        open_timeout: Duration::from_secs(60),
        ..CircuitBreakerConfig::default()
    };
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        initiator.clone(),
        ClusteringConfig::default().with_circuit_breaker(breaker),
    )
    .unwrap();
    let client = TestClient::new(selector);

    // Started on e1 before the other invocation moved the selector to e2
    let mut pending = Exchange::new(endpoints[0].clone(), Operation::new("greet"));
    pending.out_message.params = Some(vec![]);
    client.selector.prepare(&mut pending);

    client.call("greet").unwrap();
    assert_eq!(client.selector.endpoint(), endpoints[1]);

    pending.out_message.fault =
        Some(TransportError::ConnectionFailed("http://a1/svc: refused".to_string()).into());
    client.selector.complete(&mut pending);
    assert!(pending.completed);

    let breakers = client.selector.circuit_breakers().unwrap();
    assert_eq!(breakers.state("http://a1/svc"), CircuitState::Open);
    assert_eq!(breakers.state("http://a2/svc"), CircuitState::Closed);
    assert_eq!(breakers.stats("http://a2/svc").unwrap().failure_count, 0);
    assert_eq!(client.selector.metrics().circuit_trips, 1);
    assert_eq!(client.selector.endpoint(), endpoints[1]);
    assert_eq!(client.selector.pending_invocations(), 0);
}

#[test]
fn test_service_not_available_only_mode() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
    ];
    let config = ClusteringConfig {
        support_not_available_errors_only: true,
        ..ClusteringConfig::default()
    };

    // 503 is a "service not available" answer and fails over
    let initiator = ScriptedInitiator::new(&[
        ("http://a1/svc", Behavior::Answer(503)),
        ("http://a2/svc", Behavior::Answer(200)),
    ]);
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        initiator.clone(),
        config.clone(),
    )
    .unwrap();
    let client = TestClient::new(selector);
    client.call("greet").unwrap();
    assert_eq!(initiator.sends("http://a2/svc"), 1);

    // Other error statuses do not
    let initiator = ScriptedInitiator::new(&[
        ("http://a1/svc", Behavior::Answer(400)),
        ("http://a2/svc", Behavior::Answer(200)),
    ]);
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        initiator.clone(),
        config,
    )
    .unwrap();
    let client = TestClient::new(selector);
    assert!(client.call("greet").is_err());
    assert_eq!(initiator.sends("http://a2/svc"), 0);
}

#[test]
fn test_explicit_conduit_on_message_wins() {
    let e1 = endpoint("e1", "http://a1/svc", "b1");
    let initiator = ScriptedInitiator::new(&[]);
    let selector = TargetSelector::new(
        e1.clone(),
        registry(&[e1.clone()]),
        initiator.clone(),
        ClusteringConfig::default(),
    )
    .unwrap();

    let selected = selector.select_conduit(&Message::new()).unwrap();
    let again = selector.select_conduit(&Message::new()).unwrap();
    assert!(Arc::ptr_eq(&selected, &again));

    let explicit = initiator
        .get_conduit(&endpoint("x", "http://explicit/svc", "b1"))
        .unwrap();
    let mut message = Message::new();
    message.conduit = Some(Arc::clone(&explicit));
    let chosen = selector.select_conduit(&message).unwrap();
    assert_eq!(chosen.target().address(), "http://explicit/svc");
}

#[test]
fn test_concurrent_invocations_share_failover() {
    let endpoints = [
        endpoint("e1", "http://a1/svc", "b1"),
        endpoint("e2", "http://a2/svc", "b1"),
    ];
    let initiator = ScriptedInitiator::new(&[("http://a2/svc", Behavior::Answer(200))]);
    let selector = TargetSelector::new(
        endpoints[0].clone(),
        registry(&endpoints),
        initiator,
        ClusteringConfig::default(),
    )
    .unwrap();
    let client = TestClient::new(selector);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            std::thread::spawn(move || client.call("greet").is_ok())
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(client.selector.pending_invocations(), 0);
    assert_eq!(client.selector.endpoint().address(), "http://a2/svc");
}
