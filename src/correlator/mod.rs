//! Request/reply correlation and subscription routing atop a [`Session`].
//!
//! The teacher's codebase never separated this concern from the session
//! object itself (`WebSocketRpcSession` mixed transport-lifecycle and
//! command-dispatch responsibilities); this module is this rendition's
//! split of that responsibility into its own component, built the same
//! way the teacher builds everything else that waits on a future:
//! a pending-map of oneshot senders keyed by id, with `tokio::time::sleep`
//! racing the reply via [`futures::future::select`].

pub mod subscription;

use std::{
    cell::RefCell, collections::HashMap, rc::Rc, sync::Arc, time::Duration,
};

use futures::{channel::oneshot, future, StreamExt};
use serde_json::Value;

use crate::{
    codec::{RequestId, ServerMsg, SubscriptionId},
    error::SessionRpcError,
    session::Session,
};

use self::subscription::{ActiveSubscription, SubSpec};

/// Correlates outgoing requests with their replies, and routes incoming
/// notifications to their registered subscriptions.
pub struct Correlator {
    session: Session,
    pending: Rc<RefCell<HashMap<RequestId, PendingRequest>>>,
    subscriptions:
        Rc<RefCell<HashMap<SubscriptionId, ActiveSubscription>>>,
}

struct PendingRequest {
    resolve: oneshot::Sender<Result<Value, SessionRpcError>>,
}

impl Correlator {
    /// Wraps `session`, spawning the listener task that demultiplexes its
    /// `on_server_message` stream into reply resolutions and notification
    /// dispatch.
    #[must_use]
    pub fn new(session: Session) -> Self {
        let pending = Rc::new(RefCell::new(HashMap::new()));
        let subscriptions = Rc::new(RefCell::new(HashMap::new()));

        let mut messages = session.on_server_message();
        let pending_task = Rc::clone(&pending);
        let subs_task = Rc::clone(&subscriptions);
        tokio::task::spawn_local(async move {
            while let Some(msg) = messages.next().await {
                Self::dispatch(&pending_task, &subs_task, msg);
            }
            // The session itself was dropped: every outstanding request is
            // rejected, every subscription is implicitly closed by the
            // now-empty routing table.
            for (_, req) in pending_task.borrow_mut().drain() {
                let _ = req.resolve.send(Err(SessionRpcError::ConnectionClosed));
            }
            subs_task.borrow_mut().clear();
        });

        // A session drop isn't only "the message stream ended" — every
        // transition *away* from `Connected` invalidates the old
        // `sessionId` that every pending request and subscription was
        // scoped to, reconnect or not. No auto-resubscribe is performed
        // here; that is left to whatever owns this `Correlator` (see
        // DESIGN.md's resolution of the distilled spec's open question).
        let mut states = session.on_state_change();
        let pending_state = Rc::clone(&pending);
        let subs_state = Rc::clone(&subscriptions);
        tokio::task::spawn_local(async move {
            let mut was_connected = false;
            while let Some(status) = states.next().await {
                let now_connected =
                    matches!(status, crate::session::SessionStatus::Connected { .. });
                if was_connected && !now_connected {
                    for (_, req) in pending_state.borrow_mut().drain() {
                        let _ = req
                            .resolve
                            .send(Err(SessionRpcError::ConnectionClosed));
                    }
                    subs_state.borrow_mut().clear();
                }
                was_connected = now_connected;
            }
        });

        Self {
            session,
            pending,
            subscriptions,
        }
    }

    fn dispatch(
        pending: &Rc<RefCell<HashMap<RequestId, PendingRequest>>>,
        subscriptions: &Rc<RefCell<HashMap<SubscriptionId, ActiveSubscription>>>,
        msg: ServerMsg,
    ) {
        match msg {
            ServerMsg::Reply {
                request_id,
                status,
                payload,
                ..
            } => {
                let Some(req) = pending.borrow_mut().remove(&request_id) else {
                    log::warn!("dropping unmatched reply for request {request_id}");
                    return;
                };
                let result = if status.is_success() {
                    Ok(payload.unwrap_or(Value::Null))
                } else {
                    Err(SessionRpcError::ServerError {
                        code: status.code,
                        message: status.message.unwrap_or_default(),
                    })
                };
                let _ = req.resolve.send(result);
            }
            ServerMsg::Notification {
                subscription_id,
                payload,
                ..
            } => {
                let subs = subscriptions.borrow();
                let Some(sub) = subs.get(&subscription_id) else {
                    log::warn!(
                        "dropping notification for unknown subscription {subscription_id}"
                    );
                    return;
                };
                sub.dispatch(payload);
            }
            // Session-management variants never reach the correlator;
            // `Session` consumes them itself.
            ServerMsg::SessionCreateReply { .. }
            | ServerMsg::SessionKeepaliveReply { .. } => {}
        }
    }

    /// Issues a request built from `command`/`params`, resolving once a
    /// matching [`ServerMsg::Reply`] arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Errors with [`SessionRpcError::NotConnected`] if the session is not
    /// currently connected, [`SessionRpcError::Timeout`] if no reply
    /// arrives in time, or whatever error the reply itself carried.
    pub async fn request(
        &self,
        command: impl Into<String>,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, SessionRpcError> {
        let command = command.into();
        let request_id = self
            .session
            .send_request(command.clone(), params)
            .map_err(|_| SessionRpcError::NotConnected)?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .borrow_mut()
            .insert(request_id, PendingRequest { resolve: tx });

        let timeout_ms = timeout.as_millis() as u64;
        match future::select(rx, Box::pin(tokio::time::sleep(timeout))).await
        {
            future::Either::Left((reply, _)) => {
                reply.unwrap_or(Err(SessionRpcError::ConnectionClosed))
            }
            future::Either::Right((_, _)) => {
                self.pending.borrow_mut().remove(&request_id);
                Err(SessionRpcError::Timeout {
                    command,
                    timeout_ms,
                })
            }
        }
    }

    /// Subscribes via `spec`, registering `params` and routing future
    /// notifications through `spec`'s decoder to `sink`.
    ///
    /// # Errors
    ///
    /// Errors the same way [`Self::request`] does for the underlying
    /// subscribe request.
    pub async fn subscribe(
        &self,
        spec: Arc<dyn SubSpec>,
        params: Value,
        sink: Box<dyn Fn(Value)>,
        timeout: Duration,
    ) -> Result<SubscriptionId, SessionRpcError> {
        let (command, request_params) = spec.subscribe(params);
        let reply = self.request(command, request_params, timeout).await?;
        let subscription_id = reply
            .get("subscriptionId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                SessionRpcError::DecodeFailure(
                    "subscribe reply missing subscriptionId".to_owned(),
                )
            })?;

        self.subscriptions.borrow_mut().insert(
            subscription_id.clone(),
            ActiveSubscription::new(spec, sink),
        );
        Ok(subscription_id)
    }

    /// Fire-and-forget unsubscribe: removes the routing entry immediately
    /// and best-effort notifies the server of `subscription_id`'s closure.
    /// The request's eventual reply, if any, is dropped as unmatched by
    /// [`Self::dispatch`]. Unknown `subscription_id`s are logged and
    /// otherwise ignored.
    pub fn unsubscribe(&self, subscription_id: &str) {
        let removed = self.subscriptions.borrow_mut().remove(subscription_id);
        let Some(sub) = removed else {
            log::warn!("unsubscribe for unknown subscription {subscription_id}");
            return;
        };
        let (command, params) = sub.spec().unsubscribe(subscription_id);
        let _ = self.session.send_request(command, params);
    }
}
