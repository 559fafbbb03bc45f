//! Subscription specs and the routing table entry created for each active
//! subscription.

use std::sync::Arc;

use serde_json::Value;

/// Describes one kind of subscription: how to build its subscribe/
/// unsubscribe requests. Implemented once per notification topic a
/// consumer cares about (analogous to the teacher's per-event `RpcEvent`
/// variants, generalized into an open set of specs instead of a closed
/// enum, since this crate no longer knows the application's event
/// taxonomy).
///
/// `Send + Sync` so a [`SubSpec`] registry can be built on the host thread
/// and handed to the worker thread at spawn time.
pub trait SubSpec: Send + Sync {
    /// Builds the `(command, params)` pair used to open this subscription.
    fn subscribe(&self, params: Value) -> (String, Value);

    /// Builds the `(command, params)` pair used to close a subscription
    /// previously opened with [`Self::subscribe`].
    fn unsubscribe(&self, subscription_id: &str) -> (String, Value);
}

/// Routing-table entry for one server-assigned subscription id: carries
/// the sink a decoded notification payload is handed to.
pub struct ActiveSubscription {
    spec: Arc<dyn SubSpec>,
    sink: Box<dyn Fn(Value)>,
}

impl ActiveSubscription {
    /// Creates a new routing entry delivering decoded payloads to `sink`.
    #[must_use]
    pub fn new(spec: Arc<dyn SubSpec>, sink: Box<dyn Fn(Value)>) -> Self {
        Self { spec, sink }
    }

    /// Delivers `payload` to this subscription's sink.
    pub fn dispatch(&self, payload: Value) {
        (self.sink)(payload);
    }

    /// Returns the [`SubSpec`] this subscription was opened with, so
    /// [`Correlator::unsubscribe`][1] can build the matching unsubscribe
    /// request without the caller having to keep its own copy around.
    ///
    /// [1]: super::Correlator::unsubscribe
    #[must_use]
    pub fn spec(&self) -> &Arc<dyn SubSpec> {
        &self.spec
    }
}
