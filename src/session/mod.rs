//! Session state machine: lifts a raw [`RpcTransport`] into a logical
//! session with a stable identity across brief disconnects, keeps it alive,
//! and recovers from transport failure.
//!
//! Grounded in the teacher's `WebSocketRpcSession`/`WebSocketRpcClient`
//! pair (`rpc/rpc_session.rs`, `rpc/websocket/client.rs`): an
//! [`ObservableCell`]-backed state cell, a set of `spawn_*_watcher` tasks
//! each looping over a state-change stream, and `Rc`/`Weak` self-references
//! so watcher tasks outlive any single caller without leaking after the
//! [`Session`] itself is dropped.

pub mod backoff;
pub mod keepalive;

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use derive_more::Display;
use futures::{
    channel::{mpsc, oneshot},
    future::AbortHandle,
    stream::LocalBoxStream,
    StreamExt,
};
use medea_reactive::ObservableCell;
use tracerr::Traced;
use url::Url;

use crate::{
    codec::{self, ClientMsg, RequestId, ServerMsg, SessionId},
    config::SessionConfig,
    error::{SessionError, TransportError},
    transport::{RpcTransport, TransportState},
    utils::{
        resettable_delay::{resettable_delay_for, ResettableDelayHandle},
        task_spawner::TaskHandlesStorage,
    },
};

use self::{backoff::ReconnectDelay, keepalive::KeepaliveState};

/// Lifecycle states a [`Session`] moves through.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum SessionStatus {
    /// No connection attempt is in progress.
    #[display(fmt = "disconnected")]
    Disconnected,

    /// Transport connection is being established.
    #[display(fmt = "connecting")]
    Connecting,

    /// Transport is open; waiting for `SessionCreateReply`.
    #[display(fmt = "session-init")]
    SessionInit,

    /// Session is fully established and usable.
    #[display(fmt = "connected({})", session_id)]
    Connected {
        /// Server-assigned session identifier.
        session_id: SessionId,
    },

    /// Keepalive failure threshold was reached; forcing a reconnect.
    #[display(fmt = "keepalive-failed")]
    KeepaliveFailed,

    /// Reconnect attempts were exhausted, or an unrecoverable error
    /// occurred.
    #[display(fmt = "error")]
    Error,
}

impl SessionStatus {
    /// Returns the current session identifier, if [`Connected`][Self::Connected].
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Connected { session_id } => Some(session_id),
            _ => None,
        }
    }
}

/// Factory used by a [`Session`] to open a new [`RpcTransport`] on demand,
/// mirroring the teacher's `RpcTransportFactory`.
pub type TransportFactory = Rc<
    dyn Fn(
        Url,
    ) -> futures::future::LocalBoxFuture<
        'static,
        Result<Rc<dyn RpcTransport>, TransportError>,
    >,
>;

/// Session state machine described in full in the crate's design
/// document; see [`SessionStatus`] for the state table.
#[derive(Clone)]
pub struct Session(Rc<Inner>);

struct Inner {
    transport_factory: TransportFactory,
    config: RefCell<Option<SessionConfig>>,
    status: ObservableCell<SessionStatus>,
    transport: RefCell<Option<Rc<dyn RpcTransport>>>,
    reconnect_attempts_left: RefCell<u32>,
    reconnect_delay: RefCell<Option<ReconnectDelay>>,
    keepalive: RefCell<Option<KeepaliveState>>,
    /// Resettable silence timer backing the current keepalive loop; reset
    /// from [`Session::on_raw_message`] on every decoded frame so a
    /// keepalive is only ever sent after a full interval of true silence.
    keepalive_delay: RefCell<Option<ResettableDelayHandle>>,
    /// [`AbortHandle`] of the currently running [`Session::spawn_keepalive_timer`]
    /// loop. Timer handles are singletons: starting a new one aborts
    /// whichever loop this holds first, so a reconnect can never leave two
    /// keepalive loops running for the same [`Session`].
    keepalive_timer_task: RefCell<Option<AbortHandle>>,
    /// Set just before the keepalive timer force-closes a stale transport,
    /// so the transport-close watcher knows to reset the reconnect budget
    /// to the configured maximum instead of spending one attempt from it —
    /// per the design decision that a keepalive failure is evidence of a
    /// stale socket, not of an exhausted reconnect policy.
    keepalive_triggered_close: std::cell::Cell<bool>,
    next_request_id: RefCell<RequestId>,
    pending_session_requests:
        RefCell<HashMap<RequestId, mpsc::UnboundedSender<ServerMsg>>>,
    app_message_subs: RefCell<Vec<mpsc::UnboundedSender<ServerMsg>>>,
    tasks: TaskHandlesStorage,
}

impl Session {
    /// Creates a new, disconnected [`Session`] that will open transports
    /// via `transport_factory`.
    #[must_use]
    pub fn new(transport_factory: TransportFactory) -> Self {
        Self(Rc::new(Inner {
            transport_factory,
            config: RefCell::new(None),
            status: ObservableCell::new(SessionStatus::Disconnected),
            transport: RefCell::new(None),
            reconnect_attempts_left: RefCell::new(0),
            reconnect_delay: RefCell::new(None),
            keepalive: RefCell::new(None),
            keepalive_delay: RefCell::new(None),
            keepalive_timer_task: RefCell::new(None),
            keepalive_triggered_close: std::cell::Cell::new(false),
            next_request_id: RefCell::new(0),
            pending_session_requests: RefCell::new(HashMap::new()),
            app_message_subs: RefCell::new(Vec::new()),
            tasks: TaskHandlesStorage::default(),
        }))
    }

    /// Current [`SessionStatus`].
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.0.status.get()
    }

    /// Stream of every [`SessionStatus`] change, starting with the current
    /// one.
    pub fn on_state_change(&self) -> LocalBoxStream<'static, SessionStatus> {
        self.0.status.subscribe()
    }

    /// Stream of application-level [`ServerMsg`]s (`Reply`/`Notification`)
    /// forwarded by this session once it has validated their `session_id`.
    /// Session-management variants are consumed internally and never
    /// appear here.
    pub fn on_server_message(&self) -> LocalBoxStream<'static, ServerMsg> {
        let (tx, rx) = mpsc::unbounded();
        self.0.app_message_subs.borrow_mut().push(tx);
        rx.boxed_local()
    }

    /// Begins connecting with `config`, resetting the reconnect budget.
    ///
    /// Resolves once the session reaches [`Connected`][SessionStatus::Connected]
    /// or gives up and reaches [`Disconnected`][SessionStatus::Disconnected].
    ///
    /// # Errors
    ///
    /// Errors if every reconnect attempt is exhausted before a session is
    /// established.
    pub async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(), Traced<SessionError>> {
        *self.0.reconnect_attempts_left.borrow_mut() =
            config.max_reconnect_attempts;
        *self.0.reconnect_delay.borrow_mut() =
            Some(ReconnectDelay::fixed(config.reconnect_interval()));
        *self.0.config.borrow_mut() = Some(config);

        self.0.status.set(SessionStatus::Connecting);

        // Driven through the same abortable task-handle machinery as every
        // other background loop this `Session` owns, so a `disconnect()`
        // racing this call — e.g. while it is asleep inside
        // `consume_reconnect_attempt`'s backoff, before any transport has
        // ever been opened and so before any watcher task exists to cancel
        // it — tears this down too, instead of letting it wake up and
        // silently connect a session nobody asked for anymore.
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let handle = crate::utils::task_spawner::spawn_task(async move {
            let result = this.drive_connect_once().await;
            let _ = tx.send(result);
        });
        self.0.tasks.register_handle(handle);

        rx.await
            .unwrap_or_else(|_| Err(tracerr::new!(SessionError::Cancelled)))
    }

    /// Tears the session down: best-effort `SessionDestroy`, cancels
    /// timers, closes the transport, and transitions to
    /// [`Disconnected`][SessionStatus::Disconnected].
    pub fn disconnect(&self) {
        if let SessionStatus::Connected { session_id } = self.0.status.get()
        {
            if let Some(transport) = self.0.transport.borrow().as_ref() {
                let msg = ClientMsg::SessionDestroy { session_id };
                if let Ok(encoded) = codec::encode(&msg) {
                    let _ = transport.send(&encoded);
                }
            }
        }
        self.0.tasks.dispose();
        if let Some(transport) = self.0.transport.borrow_mut().take() {
            transport.close();
        }
        self.reject_all_pending();
        self.0.status.set(SessionStatus::Disconnected);
    }

    /// Sends an application [`ClientMsg::Request`] and returns the request
    /// id that was assigned, so the caller (the [`Correlator`]) can match
    /// the eventual reply observed through [`Self::on_server_message`].
    ///
    /// [`Correlator`]: crate::correlator::Correlator
    ///
    /// # Errors
    ///
    /// Errors if the session is not currently [`Connected`].
    ///
    /// [`Connected`]: SessionStatus::Connected
    pub fn send_request(
        &self,
        command: String,
        params: serde_json::Value,
    ) -> Result<RequestId, SessionError> {
        let session_id = match self.0.status.get() {
            SessionStatus::Connected { session_id } => session_id,
            _ => return Err(SessionError::Transport(TransportError::ClosedSocket)),
        };
        let request_id = self.next_request_id();
        let msg = ClientMsg::Request {
            request_id,
            session_id,
            command,
            params,
        };
        self.send_client_msg(&msg)?;
        Ok(request_id)
    }

    fn next_request_id(&self) -> RequestId {
        let mut next = self.0.next_request_id.borrow_mut();
        let id = *next;
        *next += 1;
        id
    }

    fn send_client_msg(
        &self,
        msg: &ClientMsg,
    ) -> Result<(), SessionError> {
        let transport = self.0.transport.borrow();
        let transport = transport
            .as_ref()
            .ok_or(SessionError::Transport(TransportError::ClosedSocket))?;
        let encoded = codec::encode(msg)
            .map_err(|e| SessionError::Transport(TransportError::Encode(e.to_string())))?;
        transport
            .send(&encoded)
            .map_err(SessionError::Transport)
    }

    fn reject_all_pending(&self) {
        self.0.pending_session_requests.borrow_mut().clear();
        self.0.keepalive.borrow_mut().take();
        if let Some(delay) = self.0.keepalive_delay.borrow_mut().take() {
            delay.stop();
        }
        if let Some(handle) = self.0.keepalive_timer_task.borrow_mut().take() {
            handle.abort();
        }
    }

    async fn drive_connect_once(&self) -> Result<(), Traced<SessionError>> {
        loop {
            let config = self
                .0
                .config
                .borrow()
                .clone()
                .expect("connect() always sets config before driving");

            let transport = match (self.0.transport_factory)(config.url.clone())
                .await
            {
                Ok(t) => t,
                Err(e) => {
                    if !self.consume_reconnect_attempt().await {
                        self.0.status.set(SessionStatus::Disconnected);
                        return Err(tracerr::new!(SessionError::Transport(e)));
                    }
                    continue;
                }
            };

            *self.0.transport.borrow_mut() = Some(Rc::clone(&transport));
            self.spawn_transport_watchers(Rc::clone(&transport));

            self.0.status.set(SessionStatus::SessionInit);
            let request_id = self.next_request_id();
            let (tx, mut rx) = mpsc::unbounded();
            self.0
                .pending_session_requests
                .borrow_mut()
                .insert(request_id, tx);

            if let Err(e) =
                self.send_client_msg(&ClientMsg::SessionCreate { request_id })
            {
                if !self.consume_reconnect_attempt().await {
                    self.0.status.set(SessionStatus::Disconnected);
                    return Err(tracerr::new!(e));
                }
                continue;
            }

            match rx.next().await {
                Some(ServerMsg::SessionCreateReply {
                    session_id, status, ..
                }) if status.is_success() => {
                    *self.0.reconnect_attempts_left.borrow_mut() = config
                        .max_reconnect_attempts;
                    if let Some(delay) = self.0.reconnect_delay.borrow_mut().as_mut()
                    {
                        delay.reset();
                    }
                    *self.0.keepalive.borrow_mut() = Some(
                        KeepaliveState::new(
                            config.keepalive_interval(),
                            config.max_keepalive_failures,
                        ),
                    );
                    self.0
                        .status
                        .set(SessionStatus::Connected { session_id });
                    self.spawn_keepalive_timer();
                    return Ok(());
                }
                _ => {
                    if !self.consume_reconnect_attempt().await {
                        self.0.status.set(SessionStatus::Disconnected);
                        return Err(tracerr::new!(SessionError::ReconnectExhausted));
                    }
                    continue;
                }
            }
        }
    }

    /// Waits out the reconnect interval and decrements the attempt budget.
    /// Returns `false` once the budget is exhausted.
    async fn consume_reconnect_attempt(&self) -> bool {
        let mut left = self.0.reconnect_attempts_left.borrow_mut();
        if *left == 0 {
            return false;
        }
        *left -= 1;
        drop(left);

        let delay = self
            .0
            .reconnect_delay
            .borrow_mut()
            .as_mut()
            .map(ReconnectDelay::next_delay)
            .unwrap_or_default();
        self.0.status.set(SessionStatus::Connecting);
        tokio::time::sleep(delay).await;
        true
    }

    fn spawn_transport_watchers(&self, transport: Rc<dyn RpcTransport>) {
        let weak = Rc::downgrade(&self.0);
        let mut messages = transport.on_message();
        self.0.tasks.register_handle(crate::utils::task_spawner::spawn_task(
            async move {
                while let Some(raw) = messages.next().await {
                    let Some(inner) = weak.upgrade() else { break };
                    Self::on_raw_message(&inner, &raw);
                }
            },
        ));

        let weak = Rc::downgrade(&self.0);
        let mut states = transport.on_state_change();
        self.0.tasks.register_handle(crate::utils::task_spawner::spawn_task(
            async move {
                while let Some(state) = states.next().await {
                    let Some(inner) = weak.upgrade() else { break };
                    if state == TransportState::Closed {
                        if matches!(inner.status.get(), SessionStatus::SessionInit)
                        {
                            // A connect attempt is still in flight, parked
                            // on `rx.next()` awaiting its
                            // `SessionCreateReply` (state table row
                            // "SessionInit | transport onClose |
                            // Connecting"). Clearing its pending entry
                            // drops that `tx` and unblocks the in-flight
                            // `rx.next()` with `None`, so the *same*
                            // attempt retries through its own loop instead
                            // of a second, unsynchronized reconnect flow
                            // racing it for the same caller.
                            inner.transport.borrow_mut().take();
                            inner.pending_session_requests.borrow_mut().clear();
                        } else {
                            let session_handle = Session(inner);
                            session_handle.handle_transport_closed().await;
                        }
                        break;
                    }
                }
            },
        ));
    }

    fn on_raw_message(inner: &Rc<Inner>, raw: &str) {
        let msg = match codec::decode(raw) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("dropping malformed server frame: {e}");
                return;
            }
        };

        // Any well-formed frame is evidence of liveness: push the
        // keepalive silence window back out regardless of which variant
        // this is, so a keepalive is only ever sent after a full interval
        // with no traffic at all in either direction.
        if let Some(delay) = inner.keepalive_delay.borrow().as_ref() {
            delay.reset();
        }

        match msg {
            ServerMsg::SessionCreateReply { request_id, .. } => {
                Self::resolve_session_request(inner, request_id, msg);
            }
            ServerMsg::SessionKeepaliveReply {
                request_id,
                session_id,
            } => {
                let current = inner.status.get();
                if current.session_id() == Some(&session_id) {
                    if let Some(ka) = inner.keepalive.borrow_mut().as_mut() {
                        ka.record_reply();
                    }
                } else {
                    log::warn!(
                        "dropping keepalive reply for mismatched session {session_id}"
                    );
                }
                inner.pending_session_requests.borrow_mut().remove(&request_id);
            }
            ServerMsg::Reply { ref session_id, .. }
            | ServerMsg::Notification { ref session_id, .. } => {
                if inner.status.get().session_id() != Some(session_id) {
                    log::warn!("dropping message for mismatched session {session_id}");
                    return;
                }
                inner.app_message_subs.borrow_mut().retain(|tx| {
                    tx.unbounded_send(msg.clone()).is_ok()
                });
            }
        }
    }

    fn resolve_session_request(
        inner: &Rc<Inner>,
        request_id: RequestId,
        msg: ServerMsg,
    ) {
        if let Some(tx) =
            inner.pending_session_requests.borrow_mut().remove(&request_id)
        {
            let _ = tx.unbounded_send(msg);
        }
    }

    async fn handle_transport_closed(&self) {
        self.0.keepalive.borrow_mut().take();
        if let Some(delay) = self.0.keepalive_delay.borrow_mut().take() {
            delay.stop();
        }
        if let Some(handle) = self.0.keepalive_timer_task.borrow_mut().take() {
            handle.abort();
        }
        self.0.transport.borrow_mut().take();

        if self.0.keepalive_triggered_close.replace(false) {
            // A keepalive failure, not a bare transport hiccup: the socket
            // is stale, so the failure is evidence against the *socket*,
            // not the reconnect policy. Reset the budget to the configured
            // maximum before retrying, per this crate's design decision on
            // unifying the two reconnect triggers (see DESIGN.md).
            if let Some(config) = self.0.config.borrow().as_ref() {
                *self.0.reconnect_attempts_left.borrow_mut() =
                    config.max_reconnect_attempts;
            }
            self.0.status.set(SessionStatus::Connecting);
            let _ = self.drive_connect_once().await;
            return;
        }

        if self.consume_reconnect_attempt().await {
            let _ = self.drive_connect_once().await;
        } else {
            self.0.status.set(SessionStatus::Disconnected);
        }
    }

    /// Spawns the keepalive loop, enforcing the crate's silence-gated
    /// discipline: a keepalive is sent only once a full interval has
    /// passed with nothing received (the delay, reset by every decoded
    /// frame in [`Self::on_raw_message`]) *and* a full interval has passed
    /// since the previous keepalive was sent (by construction, since the
    /// next delay only starts once this loop has finished handling the
    /// previous one).
    ///
    /// Timer handles are singletons (see [`Inner::keepalive_timer_task`]):
    /// any previously running keepalive loop is aborted before this one
    /// starts, so a reconnect can never leave two loops racing to send
    /// keepalives for the same session.
    fn spawn_keepalive_timer(&self) {
        if let Some(old) = self.0.keepalive_timer_task.borrow_mut().take() {
            old.abort();
        }

        let weak = Rc::downgrade(&self.0);
        let handle = crate::utils::task_spawner::spawn_task(async move {
            loop {
                let Some(inner) = weak.upgrade() else { break };
                let interval = match inner.keepalive.borrow().as_ref() {
                    Some(ka) => ka.interval(),
                    None => break,
                };

                let (delay_fut, delay_handle) =
                    resettable_delay_for(interval, false);
                *inner.keepalive_delay.borrow_mut() = Some(delay_handle);
                delay_fut.await;

                let Some(inner) = weak.upgrade() else { break };
                if !matches!(inner.status.get(), SessionStatus::Connected { .. })
                {
                    break;
                }

                let session_id = match inner.status.get() {
                    SessionStatus::Connected { session_id } => session_id,
                    _ => break,
                };
                let session = Session(Rc::clone(&inner));
                let request_id = session.next_request_id();
                let tripped = inner
                    .keepalive
                    .borrow_mut()
                    .as_mut()
                    .map(KeepaliveState::record_sent)
                    .unwrap_or(true);

                if tripped {
                    inner.status.set(SessionStatus::KeepaliveFailed);
                    inner.keepalive_triggered_close.set(true);
                    if let Some(transport) = inner.transport.borrow_mut().take() {
                        transport.close();
                    }
                    break;
                }

                let _ = session.send_client_msg(&ClientMsg::SessionKeepalive {
                    request_id,
                    session_id,
                });
            }
        });

        self.0.tasks.register_handle(handle.clone());
        *self.0.keepalive_timer_task.borrow_mut() = Some(handle);
    }
}
