//! Typed subscription handles returned by [`Facade::subscribe`].
//!
//! [`Facade::subscribe`]: super::Facade

use std::{
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use super::Facade;

/// Describes one kind of subscription a [`Facade`] can open: the name its
/// `subscriptionName` is registered under in the worker's
/// [`SubscriptionRegistry`][crate::worker::SubscriptionRegistry], and the
/// type its notification payloads decode into.
///
/// The *how* of building subscribe/unsubscribe requests stays with the
/// [`SubSpec`][crate::correlator::subscription::SubSpec] registered on the
/// worker side under the same name — this trait only carries what the host
/// needs for a type-safe call.
pub trait SubscriptionSpec {
    /// Type a notification payload for this subscription decodes into.
    type Item: DeserializeOwned;

    /// Name this subscription is registered under in the worker's
    /// [`SubscriptionRegistry`][crate::worker::SubscriptionRegistry].
    const NAME: &'static str;
}

/// A live subscription opened through [`Facade::subscribe`].
///
/// Implements [`Stream`] yielding decoded `T`s in wire order; a
/// notification that fails to decode is logged and dropped, never
/// surfaced as a stream item (matching this crate's "log and drop"
/// notification-decode-failure policy). Dropping the handle unsubscribes,
/// the idiomatic Rust stand-in for the distilled spec's explicit
/// `unsubscribe(internalId)` call.
pub struct SubscriptionHandle<T> {
    pub(super) internal_id: u64,
    pub(super) facade: Facade,
    pub(super) receiver: mpsc::UnboundedReceiver<Value>,
    pub(super) _marker: PhantomData<fn() -> T>,
}

impl<T> SubscriptionHandle<T> {
    /// The stable key [`Event::Notification`][crate::worker::Event::Notification]s
    /// for this subscription are tagged with.
    #[must_use]
    pub fn internal_id(&self) -> u64 {
        self.internal_id
    }
}

impl<T: DeserializeOwned> Stream for SubscriptionHandle<T> {
    type Item = T;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            return match self.receiver.poll_recv(cx) {
                Poll::Ready(Some(payload)) => {
                    match serde_json::from_value(payload) {
                        Ok(item) => Poll::Ready(Some(item)),
                        Err(e) => {
                            log::warn!(
                                "dropping notification that failed to \
                                 decode: {e}"
                            );
                            continue;
                        }
                    }
                }
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

impl<T> Drop for SubscriptionHandle<T> {
    fn drop(&mut self) {
        self.facade.unsubscribe(self.internal_id);
    }
}
