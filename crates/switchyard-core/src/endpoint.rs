//! Endpoints and the service registry that enumerates them.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifies a binding (protocol and message format) an endpoint speaks.
///
/// Two endpoints may only stand in for each other when their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingKey(Arc<str>);

impl BindingKey {
    /// Creates a binding key.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete address at which a logical service can be reached.
///
/// Cloning is cheap. Several endpoints may describe the same service over
/// different addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    name: Arc<str>,
    address: Arc<str>,
    binding: BindingKey,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(
        name: impl Into<Arc<str>>,
        address: impl Into<Arc<str>>,
        binding: BindingKey,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            binding,
        }
    }

    /// Endpoint name, unique within its service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target address (URL).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Binding this endpoint speaks.
    pub fn binding(&self) -> &BindingKey {
        &self.binding
    }

    /// Same endpoint, different address.
    pub fn with_address(&self, address: impl Into<Arc<str>>) -> Self {
        Self {
            name: Arc::clone(&self.name),
            address: address.into(),
            binding: self.binding.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// Enumerates the endpoints of the service a client talks to.
///
/// Implementations are expected to return endpoints in a stable, natural order;
/// failover strategies preserve that order.
pub trait EndpointProvider: Send + Sync + fmt::Debug {
    /// All endpoints the service currently offers.
    fn service_endpoints(&self) -> Vec<Endpoint>;

    /// Address of an endpoint.
    fn address_of<'a>(&self, endpoint: &'a Endpoint) -> &'a str {
        endpoint.address()
    }

    /// Binding compatibility key of an endpoint.
    fn binding_key_of<'a>(&self, endpoint: &'a Endpoint) -> &'a BindingKey {
        endpoint.binding()
    }
}

/// In-memory [`EndpointProvider`] for a single named service.
#[derive(Debug)]
pub struct StaticServiceRegistry {
    service: String,
    endpoints: RwLock<Vec<Endpoint>>,
}

impl StaticServiceRegistry {
    /// Creates a registry holding `endpoints` in the given order.
    pub fn new(service: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            service: service.into(),
            endpoints: RwLock::new(endpoints),
        }
    }

    /// Service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Appends an endpoint, replacing one with the same name.
    pub fn register(&self, endpoint: Endpoint) {
        let mut endpoints = self.endpoints.write();
        if let Some(existing) = endpoints.iter_mut().find(|e| e.name() == endpoint.name()) {
            *existing = endpoint;
        } else {
            debug!(service = %self.service, endpoint = %endpoint, "Registered endpoint");
            endpoints.push(endpoint);
        }
    }

    /// Removes the endpoint with the given name, returning it.
    pub fn deregister(&self, name: &str) -> Option<Endpoint> {
        let mut endpoints = self.endpoints.write();
        let index = endpoints.iter().position(|e| e.name() == name)?;
        Some(endpoints.remove(index))
    }

    /// Looks up an endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.read().iter().find(|e| e.name() == name).cloned()
    }
}

impl EndpointProvider for StaticServiceRegistry {
    fn service_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn soap() -> BindingKey {
        BindingKey::new("soap11")
    }

    #[test]
    fn test_with_address_keeps_identity() {
        let e1 = Endpoint::new("primary", "http://a:8080/svc", soap());
        let e2 = e1.with_address("http://b:8080/svc");
        assert_eq!(e2.name(), "primary");
        assert_eq!(e2.binding(), &soap());
        assert_eq!(e2.address(), "http://b:8080/svc");
        assert_ne!(e1, e2);
    }

    #[test]
    fn test_registry_preserves_order_and_replaces_by_name() {
        let registry = StaticServiceRegistry::new(
            "Greeter",
            vec![
                Endpoint::new("one", "http://a/svc", soap()),
                Endpoint::new("two", "http://b/svc", soap()),
            ],
        );
        registry.register(Endpoint::new("one", "http://c/svc", soap()));
        registry.register(Endpoint::new("three", "http://d/svc", soap()));

        let addresses: Vec<_> = registry
            .service_endpoints()
            .iter()
            .map(|e| e.address().to_string())
            .collect();
        assert_eq!(addresses, vec!["http://c/svc", "http://b/svc", "http://d/svc"]);

        assert!(registry.deregister("two").is_some());
        assert!(registry.deregister("two").is_none());
        assert_eq!(registry.service_endpoints().len(), 2);
    }
}
