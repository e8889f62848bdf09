//! Stored invocations that a failover can replay.

use std::collections::HashMap;

use parking_lot::Mutex;
use switchyard_core::{CallContext, Endpoint, InvocationId, Operation};

use crate::strategy::AlternateList;

/// Everything needed to resubmit one logical call against another endpoint.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Endpoint the call was first aimed at
    pub original_endpoint: Endpoint,
    /// Address the call was first aimed at
    pub original_address: String,
    /// Operation invoked
    pub operation: Operation,
    /// Marshalled parameters
    pub params: Vec<serde_json::Value>,
    /// Caller supplied context
    pub context: CallContext,
    /// Remaining alternates; computed on the first failover
    pub alternates: Option<AlternateList>,
}

/// Invocation contexts keyed by id.
///
/// Every method takes the lock for a single lookup, insert or remove.
#[derive(Debug, Default)]
pub(crate) struct InvocationTable {
    contexts: Mutex<HashMap<InvocationId, InvocationContext>>,
}

impl InvocationTable {
    /// Inserts `context` unless one is already stored for `id`.
    pub(crate) fn insert_if_absent(&self, id: InvocationId, context: impl FnOnce() -> InvocationContext) {
        self.contexts.lock().entry(id).or_insert_with(context);
    }

    pub(crate) fn get(&self, id: &InvocationId) -> Option<InvocationContext> {
        self.contexts.lock().get(id).cloned()
    }

    /// Applies `f` to the stored context, if any.
    pub(crate) fn update<R>(
        &self,
        id: &InvocationId,
        f: impl FnOnce(&mut InvocationContext) -> R,
    ) -> Option<R> {
        self.contexts.lock().get_mut(id).map(f)
    }

    pub(crate) fn remove(&self, id: &InvocationId) -> Option<InvocationContext> {
        self.contexts.lock().remove(id)
    }

    pub(crate) fn contains(&self, id: &InvocationId) -> bool {
        self.contexts.lock().contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.contexts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::BindingKey;

    fn context(address: &str) -> InvocationContext {
        InvocationContext {
            original_endpoint: Endpoint::new("e1", address, BindingKey::new("b")),
            original_address: address.to_string(),
            operation: Operation::new("op"),
            params: vec![serde_json::json!(1)],
            context: CallContext::new(),
            alternates: None,
        }
    }

    #[test]
    fn test_first_snapshot_wins() {
        let table = InvocationTable::default();
        let id = InvocationId::new();
        table.insert_if_absent(id, || context("http://first"));
        table.insert_if_absent(id, || context("http://second"));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&id).unwrap().original_address, "http://first");
    }

    #[test]
    fn test_update_and_remove() {
        let table = InvocationTable::default();
        let id = InvocationId::new();
        assert!(table.update(&id, |_| ()).is_none());

        table.insert_if_absent(id, || context("http://a"));
        table.update(&id, |ctx| ctx.alternates = Some(AlternateList::default()));
        assert!(table.get(&id).unwrap().alternates.is_some());

        assert!(table.remove(&id).is_some());
        assert!(!table.contains(&id));
    }
}
