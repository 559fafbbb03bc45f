//! The host-thread facade: a promise-based (here, `async fn`-based) public
//! API wrapping the [`worker`][crate::worker] boundary.
//!
//! Grounded in the teacher's `RoomHandle`/`ConnectionHandle` pattern of a
//! small `Clone`-able handle wrapping `Rc`-shared state that the real work
//! happens behind — generalized here to `Arc`-shared state, since a
//! [`Facade`] (unlike the teacher's wasm-bindgen-exported handles) must be
//! `Send` to be held by whichever thread the embedding application's async
//! runtime happens to schedule it on.

pub mod command;
pub mod subscription;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::{
    channel::oneshot,
    stream::{self, BoxStream},
    StreamExt,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::{
    codec::SessionId,
    config::SessionConfig,
    error::SessionRpcError,
    session::SessionStatus,
    worker::{Command, Event, SubscriptionRegistry, WorkerHandle},
};

pub use self::{command::RpcCommand, subscription::SubscriptionSpec};
use self::subscription::SubscriptionHandle;

/// Capacity of the internal `StateChanged` broadcast channel. Sized
/// generously so a slow subscriber only ever misses intermediate states
/// during a fast reconnect burst, never the final one it's waiting for
/// (every subsequent `recv` skips forward past a `Lagged` error).
const STATE_CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Single class per session: owns the worker handle, the pending-future
/// map for host-side calls, and the `internalId → notification channel`
/// map for subscriptions, per this crate's ownership model.
#[derive(Clone)]
pub struct Facade {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    commands: mpsc::UnboundedSender<Command>,
    next_request_id: AtomicU64,
    next_internal_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, SessionRpcError>>>>,
    subscription_senders: Mutex<HashMap<u64, mpsc::UnboundedSender<Value>>>,
    subscription_ids: Mutex<HashMap<u64, String>>,
    state_tx: broadcast::Sender<SessionStatus>,
}

impl Facade {
    /// Spawns a worker thread for a new session that will connect to
    /// `config.url`, and returns the [`Facade`] handle to it. The session
    /// does not begin connecting until [`Self::connect`] is called.
    #[must_use]
    pub fn new(config: SessionConfig, subscriptions: SubscriptionRegistry) -> Self {
        let mut worker = WorkerHandle::spawn(subscriptions);
        let commands = worker.commands.clone();
        let (state_tx, _) = broadcast::channel(STATE_CHANGE_CHANNEL_CAPACITY);

        let inner = Arc::new(Inner {
            config,
            commands,
            next_request_id: AtomicU64::new(0),
            next_internal_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            subscription_senders: Mutex::new(HashMap::new()),
            subscription_ids: Mutex::new(HashMap::new()),
            state_tx,
        });

        let pump_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(event) = worker.events.recv().await {
                match event {
                    Event::Reply { request_id, result } => {
                        if let Some(tx) =
                            pump_inner.pending.lock().unwrap().remove(&request_id)
                        {
                            let _ = tx.send(result);
                        }
                    }
                    Event::Notification { internal_id, data } => {
                        let subs = pump_inner.subscription_senders.lock().unwrap();
                        if let Some(tx) = subs.get(&internal_id) {
                            let _ = tx.send(data);
                        }
                    }
                    Event::StateChanged { status } => {
                        let _ = pump_inner.state_tx.send(status);
                    }
                }
            }
            // The worker thread died (or was disposed and its event
            // channel drained and closed): every outstanding request
            // rejects with `WorkerLost` and every live subscription is
            // implicitly closed by dropping its sender.
            for (_, tx) in pump_inner.pending.lock().unwrap().drain() {
                let _ = tx.send(Err(SessionRpcError::WorkerLost));
            }
            pump_inner.subscription_senders.lock().unwrap().clear();
            let _ = pump_inner.state_tx.send(SessionStatus::Error);
            // `worker` is dropped here; its `WorkerHandle::drop` joins the
            // (already-finished) thread.
        });

        Self { inner }
    }

    fn next_request_id(&self) -> u64 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn next_internal_id(&self) -> u64 {
        self.inner.next_internal_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `command` to the worker, registering `request_id` in the
    /// pending map beforehand so the event pump can resolve it regardless
    /// of how quickly the worker replies.
    async fn call(
        &self,
        command: Command,
        request_id: u64,
    ) -> Result<Value, SessionRpcError> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(request_id, tx);

        if self.inner.commands.send(command).is_err() {
            self.inner.pending.lock().unwrap().remove(&request_id);
            return Err(SessionRpcError::WorkerLost);
        }

        rx.await.unwrap_or(Err(SessionRpcError::WorkerLost))
    }

    /// Connects the underlying session, resolving once it reaches
    /// `Connected` or rejecting once it gives up and reaches
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// Errors if the worker is gone, or if reconnect attempts were
    /// exhausted before a session was established.
    pub async fn connect(&self) -> Result<(), SessionRpcError> {
        let request_id = self.next_request_id();
        let config = self.inner.config.clone();
        self.call(Command::Connect { request_id, config }, request_id)
            .await?;
        Ok(())
    }

    /// Disconnects the underlying session, resolving once it reaches
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// Errors only if the worker is gone.
    pub async fn disconnect(&self) -> Result<(), SessionRpcError> {
        let request_id = self.next_request_id();
        self.call(Command::Disconnect { request_id }, request_id)
            .await?;
        Ok(())
    }

    /// Issues `command`, resolving with its decoded reply or rejecting
    /// with whatever [`SessionRpcError`] the worker, the session, or the
    /// decode step produced.
    ///
    /// # Errors
    ///
    /// See [`SessionRpcError`] for every way this can fail.
    pub async fn request<C: RpcCommand>(
        &self,
        command: C,
        timeout: Duration,
    ) -> Result<C::Output, SessionRpcError> {
        let request_id = self.next_request_id();
        let command_type = command.name().to_owned();
        let params = command.into_params();
        let value = self
            .call(
                Command::SendRequest {
                    request_id,
                    command_type,
                    params,
                    timeout_ms: u64::try_from(timeout.as_millis())
                        .unwrap_or(u64::MAX),
                },
                request_id,
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| SessionRpcError::DecodeFailure(e.to_string()))
    }

    /// Opens a subscription of kind `S`, returning a [`SubscriptionHandle`]
    /// streaming decoded notifications in wire order.
    ///
    /// # Errors
    ///
    /// Errors the same way [`Self::request`] does for the underlying
    /// subscribe request.
    pub async fn subscribe<S: SubscriptionSpec>(
        &self,
        params: Value,
        timeout: Duration,
    ) -> Result<SubscriptionHandle<S::Item>, SessionRpcError> {
        let request_id = self.next_request_id();
        let internal_id = self.next_internal_id();

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscription_senders
            .lock()
            .unwrap()
            .insert(internal_id, tx);

        let reply = self
            .call(
                Command::Subscribe {
                    request_id,
                    subscription_name: S::NAME.to_owned(),
                    params,
                    internal_id,
                    timeout_ms: u64::try_from(timeout.as_millis())
                        .unwrap_or(u64::MAX),
                },
                request_id,
            )
            .await;

        let reply = match reply {
            Ok(value) => value,
            Err(e) => {
                self.inner
                    .subscription_senders
                    .lock()
                    .unwrap()
                    .remove(&internal_id);
                return Err(e);
            }
        };

        let subscription_id = reply
            .get("subscriptionId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                SessionRpcError::DecodeFailure(
                    "subscribe reply missing subscriptionId".to_owned(),
                )
            })?;
        self.inner
            .subscription_ids
            .lock()
            .unwrap()
            .insert(internal_id, subscription_id);

        Ok(SubscriptionHandle {
            internal_id,
            facade: self.clone(),
            receiver: rx,
            _marker: std::marker::PhantomData,
        })
    }

    /// Closes the subscription registered under `internal_id`: removes the
    /// local routing entry immediately (so any notification already
    /// in-flight is dropped silently) and fires an unsubscribe to the
    /// worker without waiting for its reply. Called automatically when a
    /// [`SubscriptionHandle`] is dropped; calling it directly is only
    /// useful if the handle was deliberately not kept around.
    pub fn unsubscribe(&self, internal_id: u64) {
        self.inner
            .subscription_senders
            .lock()
            .unwrap()
            .remove(&internal_id);
        let Some(subscription_id) = self
            .inner
            .subscription_ids
            .lock()
            .unwrap()
            .remove(&internal_id)
        else {
            return;
        };
        let request_id = self.next_request_id();
        let _ = self.inner.commands.send(Command::Unsubscribe {
            request_id,
            subscription_id,
        });
    }

    /// Stream of every [`SessionStatus`] change.
    #[must_use]
    pub fn on_state_change(&self) -> BoxStream<'static, SessionStatus> {
        let rx = self.inner.state_tx.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(status) => return Some((status, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    /// Stream yielding the new `sessionId` every time the session becomes
    /// `Connected`.
    #[must_use]
    pub fn on_connected(&self) -> BoxStream<'static, SessionId> {
        self.on_state_change()
            .filter_map(|status| async move { status.session_id().cloned() })
            .boxed()
    }

    /// Stream yielding once every time the session becomes `Disconnected`.
    #[must_use]
    pub fn on_disconnected(&self) -> BoxStream<'static, ()> {
        self.on_state_change()
            .filter_map(|status| async move {
                matches!(status, SessionStatus::Disconnected).then_some(())
            })
            .boxed()
    }

    /// Stream yielding once every time the session reaches the terminal
    /// `Error` state.
    #[must_use]
    pub fn on_connection_error(&self) -> BoxStream<'static, ()> {
        self.on_state_change()
            .filter_map(|status| async move {
                matches!(status, SessionStatus::Error).then_some(())
            })
            .boxed()
    }
}
