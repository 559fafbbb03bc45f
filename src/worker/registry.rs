//! Name-keyed registry of [`SubSpec`]s available to [`Command::Subscribe`].
//!
//! Per this crate's design note on the distilled spec's dynamic
//! command/subscription registries: the `subscriptionName` string crossing
//! the worker boundary is reconstructed into a typed [`SubSpec`] here, and
//! nowhere else — this module is the only place a subscription's wire
//! taxonomy is named.
//!
//! [`Command::Subscribe`]: super::Command

use std::{collections::HashMap, sync::Arc};

use crate::correlator::subscription::SubSpec;

/// Immutable, `Arc`-shared table of every [`SubSpec`] a worker instance
/// knows how to open, keyed by the name a [`Facade::subscribe`][1] caller
/// passes across the worker boundary.
///
/// [1]: crate::facade::Facade::subscribe
#[derive(Clone, Default)]
pub struct SubscriptionRegistry(Arc<HashMap<String, Arc<dyn SubSpec>>>);

impl SubscriptionRegistry {
    /// Looks up the [`SubSpec`] registered under `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SubSpec>> {
        self.0.get(name).cloned()
    }
}

/// Builds a [`SubscriptionRegistry`] up front, before a [`WorkerHandle`] is
/// spawned.
///
/// [`WorkerHandle`]: super::WorkerHandle
#[derive(Default)]
pub struct SubscriptionRegistryBuilder(HashMap<String, Arc<dyn SubSpec>>);

impl SubscriptionRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `spec` under `name`, overwriting any previous registration
    /// for that name.
    #[must_use]
    pub fn register(
        mut self,
        name: impl Into<String>,
        spec: Arc<dyn SubSpec>,
    ) -> Self {
        self.0.insert(name.into(), spec);
        self
    }

    /// Finalizes the registry.
    #[must_use]
    pub fn build(self) -> SubscriptionRegistry {
        SubscriptionRegistry(Arc::new(self.0))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    struct EchoSpec;

    impl SubSpec for EchoSpec {
        fn subscribe(&self, params: Value) -> (String, Value) {
            ("EchoSubscribe".to_owned(), params)
        }

        fn unsubscribe(&self, subscription_id: &str) -> (String, Value) {
            (
                "EchoUnsubscribe".to_owned(),
                serde_json::json!({ "subscriptionId": subscription_id }),
            )
        }
    }

    #[test]
    fn looks_up_registered_spec() {
        let registry = SubscriptionRegistryBuilder::new()
            .register("echo", Arc::new(EchoSpec))
            .build();

        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }
}
