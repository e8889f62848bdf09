//! Alternate enumeration shared by all built-in strategies.

use std::sync::Arc;

use switchyard_core::{Endpoint, EndpointProvider};
use tracing::{debug, warn};

/// Source of alternates: static addresses if configured, else the provider.
#[derive(Debug, Clone, Default)]
pub(crate) struct StaticList {
    addresses: Vec<Arc<str>>,
}

impl StaticList {
    pub(crate) fn set_addresses<I, S>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.addresses = addresses.into_iter().map(Into::into).collect();
    }

    pub(crate) fn addresses(&self) -> &[Arc<str>] {
        &self.addresses
    }

    /// Endpoints to try after `current` failed, in natural order.
    pub(crate) fn alternates(
        &self,
        current: &Endpoint,
        provider: &dyn EndpointProvider,
    ) -> Vec<Endpoint> {
        if !self.addresses.is_empty() {
            return self
                .addresses
                .iter()
                .filter(|address| &***address != current.address())
                .map(|address| current.with_address(Arc::clone(address)))
                .collect();
        }

        let current_binding = provider.binding_key_of(current);
        let current_address = provider.address_of(current);
        let alternates: Vec<Endpoint> = provider
            .service_endpoints()
            .into_iter()
            .filter(|candidate| {
                if provider.address_of(candidate) == current_address {
                    return false;
                }
                if provider.binding_key_of(candidate) != current_binding {
                    warn!(
                        candidate = %candidate,
                        binding = %provider.binding_key_of(candidate),
                        expected = %current_binding,
                        "Skipping alternate with incompatible binding"
                    );
                    return false;
                }
                true
            })
            .collect();
        debug!(current = %current, count = alternates.len(), "Enumerated alternate endpoints");
        alternates
    }
}
