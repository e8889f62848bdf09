//! End-to-end failover: a dead first endpoint and a live axum server.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use switchyard::prelude::*;
use switchyard::{EndpointConfig, ServiceConfig};

struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    _runtime: tokio::runtime::Runtime,
}

impl TestServer {
    fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("server runtime");
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/greeter", post(greeter))
            .with_state(Arc::clone(&hits));
        runtime.spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self {
            addr,
            hits,
            _runtime: runtime,
        }
    }

    fn address(&self) -> String {
        format!("http://{}/greeter", self.addr)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn greeter(
    State(hits): State<Arc<AtomicUsize>>,
    Json(request): Json<serde_json::Value>,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    let name = request["params"][0].as_str().unwrap_or("stranger").to_string();
    match request["operation"].as_str() {
        Some("greet") => Json(format!("Hello, {name}")).into_response(),
        Some("notify") => StatusCode::ACCEPTED.into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"code": "NoSuchOperation", "message": name})),
        )
            .into_response(),
    }
}

/// An address nothing listens on.
fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}/greeter")
}

fn config(addresses: &[(&str, String)], policy: UseAsyncPolicy) -> SwitchyardConfig {
    SwitchyardConfig {
        service: ServiceConfig {
            name: "greeter".to_string(),
            binding: "json".to_string(),
            endpoints: addresses
                .iter()
                .map(|(name, address)| EndpointConfig {
                    name: name.to_string(),
                    address: address.clone(),
                })
                .collect(),
        },
        conduit: ConduitConfig::default().with_policy(policy),
        ..SwitchyardConfig::default()
    }
}

#[test]
fn test_dead_primary_fails_over_to_live_endpoint() {
    let server = TestServer::start();
    let config = config(
        &[("primary", dead_address()), ("backup", server.address())],
        UseAsyncPolicy::Always,
    );
    let client = FailoverClient::from_config(&config).unwrap();

    let greeting: String = client
        .call_json(Operation::new("greet"), vec!["ada".into()])
        .unwrap();
    assert_eq!(greeting, "Hello, ada");
    assert_eq!(client.selector().endpoint().name(), "backup");
    assert_eq!(server.hits(), 1);

    let failover = client.selector().metrics();
    assert_eq!(failover.failover_attempts, 1);
    assert_eq!(failover.transport_failures, 1);
    assert_eq!(failover.completions, 1);
    assert_eq!(client.selector().pending_invocations(), 0);

    let transport = client.transport_metrics().unwrap();
    assert_eq!(transport.failed_connections, 1);
    assert_eq!(transport.responses_received, 1);

    // Later calls stay on the backup
    let greeting: String = client
        .call_json(Operation::new("greet"), vec!["grace".into()])
        .unwrap();
    assert_eq!(greeting, "Hello, grace");
    assert_eq!(client.selector().metrics().failover_attempts, 1);
}

#[test]
fn test_direct_mode_fails_over_too() {
    let server = TestServer::start();
    let config = config(
        &[("primary", dead_address()), ("backup", server.address())],
        UseAsyncPolicy::Never,
    );
    let client = FailoverClient::from_config(&config).unwrap();

    let response = client
        .call(Operation::new("greet"), vec!["ada".into()])
        .unwrap();
    assert_eq!(response.content_type.as_deref(), Some("application/json"));
    assert_eq!(client.transport_metrics().unwrap().direct_requests, 2);
}

#[test]
fn test_application_fault_is_returned_without_failover() {
    let server = TestServer::start();
    let other = TestServer::start();
    let config = config(
        &[("primary", server.address()), ("backup", other.address())],
        UseAsyncPolicy::Always,
    );
    let client = FailoverClient::from_config(&config).unwrap();

    let fault = client
        .call(Operation::new("shout"), vec!["ada".into()])
        .unwrap_err();
    let application = fault.find::<ApplicationFault>().unwrap();
    assert_eq!(application.code, "NoSuchOperation");
    assert_eq!(application.message, "ada");
    assert_eq!(client.selector().endpoint().name(), "primary");
    assert_eq!(other.hits(), 0);
    assert_eq!(client.selector().metrics().non_retryable_failures, 1);
}

#[test]
fn test_all_endpoints_dead_returns_original_error() {
    let config = config(
        &[("primary", dead_address()), ("backup", dead_address())],
        UseAsyncPolicy::Always,
    );
    let client = FailoverClient::from_config(&config).unwrap();

    let fault = client
        .call(Operation::new("greet"), vec!["ada".into()])
        .unwrap_err();
    assert!(fault.is_transport_failure());
    assert!(matches!(
        fault.find::<TransportError>(),
        Some(TransportError::ConnectionFailed(_))
    ));
    assert_eq!(client.selector().endpoint().name(), "primary");

    let metrics = client.selector().metrics();
    assert_eq!(metrics.failover_attempts, 1);
    assert_eq!(metrics.failed_retries, 1);
    assert_eq!(metrics.exhausted, 1);
    assert_eq!(client.selector().pending_invocations(), 0);
}

#[test]
fn test_one_way_operation_ignores_response_body() {
    let server = TestServer::start();
    let config = config(&[("primary", server.address())], UseAsyncPolicy::Always);
    let client = FailoverClient::from_config(&config).unwrap();

    let response = client
        .call(Operation::one_way("notify"), vec!["ada".into()])
        .unwrap();
    assert!(response.payload.is_empty());
    assert_eq!(server.hits(), 1);
}
