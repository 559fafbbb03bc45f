//! The worker shell: hosts the [`Session`]/[`Correlator`]/subscription
//! registry on a dedicated OS thread driving its own single-threaded
//! `tokio` [`LocalSet`][1], and bridges that thread's `!Send` state to the
//! host-facing [`Command`]/[`Event`] channel pair described in this
//! crate's design document.
//!
//! Grounded in the teacher's split between `WebSocketRpcClient` (owner of
//! the `!Send`, `Rc`-based reactive state) and the `wasm_bindgen`-exported
//! facade types that talk to it only through owned values and streams —
//! the same ownership boundary, redrawn around a real OS thread instead of
//! the browser's main-thread/worker split.
//!
//! [1]: tokio::task::LocalSet

pub mod registry;

use std::{rc::Rc, time::Duration};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    config::SessionConfig,
    correlator::Correlator,
    error::SessionRpcError,
    session::{Session, SessionStatus, TransportFactory},
    transport::{websocket::WebSocketTransport, RpcTransport},
};

pub use self::registry::{SubscriptionRegistry, SubscriptionRegistryBuilder};

/// A single unit of work sent from the host [`Facade`][crate::facade::Facade]
/// to the worker thread. Every field is plain, owned, `Send + 'static`
/// data — no `Rc`/`RefCell` ever crosses this boundary, matching the
/// concurrency model's "no shared mutable state crosses the worker
/// boundary" rule.
#[derive(Clone, Debug)]
pub enum Command {
    /// Connects the session with `config`. The worker replies once the
    /// session reaches `Connected` or gives up and reaches `Disconnected`.
    Connect {
        /// Id correlating this command with its [`Event::Reply`].
        request_id: u64,
        /// Configuration to connect with.
        config: SessionConfig,
    },

    /// Tears the session down. The worker replies once it reaches
    /// `Disconnected`.
    Disconnect {
        /// Id correlating this command with its [`Event::Reply`].
        request_id: u64,
    },

    /// Issues an application-level request through the [`Correlator`].
    SendRequest {
        /// Id correlating this command with its [`Event::Reply`].
        request_id: u64,
        /// Name of the command being invoked.
        command_type: String,
        /// Command parameters.
        params: Value,
        /// How long to wait for a reply before timing out.
        timeout_ms: u64,
    },

    /// Opens a subscription registered under `subscription_name`.
    Subscribe {
        /// Id correlating this command with its [`Event::Reply`].
        request_id: u64,
        /// Name the [`SubscriptionRegistry`] has this subscription's
        /// [`SubSpec`][crate::correlator::subscription::SubSpec] under.
        subscription_name: String,
        /// Subscription parameters.
        params: Value,
        /// Facade-chosen stable key future [`Event::Notification`]s for
        /// this subscription will be tagged with.
        internal_id: u64,
        /// How long to wait for the subscribe reply before timing out.
        timeout_ms: u64,
    },

    /// Closes a previously-opened subscription.
    Unsubscribe {
        /// Id correlating this command with its [`Event::Reply`].
        request_id: u64,
        /// Server-assigned id of the subscription to close.
        subscription_id: String,
    },

    /// Tears everything down and stops the worker loop. Sent only from
    /// [`WorkerHandle`]'s [`Drop`] impl.
    Dispose,
}

/// A single unit of work sent from the worker thread back to the host.
#[derive(Clone, Debug)]
pub enum Event {
    /// Resolution of a previously-issued [`Command`] that carried a
    /// `request_id` (`Connect`, `Disconnect`, `SendRequest`, `Subscribe`,
    /// `Unsubscribe`). A successful [`Command::Subscribe`] carries
    /// `{"subscriptionId": ...}` as its `Ok` payload.
    Reply {
        /// Id of the [`Command`] this event resolves.
        request_id: u64,
        /// Outcome of the command.
        result: Result<Value, SessionRpcError>,
    },

    /// A decoded notification for the subscription registered under
    /// `internal_id`.
    Notification {
        /// Facade-chosen key identifying which subscription this
        /// notification belongs to.
        internal_id: u64,
        /// Decoded notification payload.
        data: Value,
    },

    /// The session's [`SessionStatus`] changed.
    StateChanged {
        /// The status the session transitioned to.
        status: SessionStatus,
    },
}

/// Handle to a running worker thread: the host-owned ends of the
/// [`Command`]/[`Event`] channel pair, plus the thread's
/// [`JoinHandle`][std::thread::JoinHandle].
///
/// Dropping a [`WorkerHandle`] disposes of the worker cleanly: it sends
/// [`Command::Dispose`] and blocks until the thread has joined, matching
/// the resource policy's "worker terminates cleanly on dispose()".
pub struct WorkerHandle {
    /// Sending half the host uses to issue [`Command`]s.
    pub commands: mpsc::UnboundedSender<Command>,
    /// Receiving half the host drains for [`Event`]s.
    pub events: mpsc::UnboundedReceiver<Event>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns a new worker thread driving a fresh [`Session`]/[`Correlator`]
    /// pair over a [`WebSocketTransport`], with `subscriptions` as the
    /// dispatch table available to [`Command::Subscribe`].
    #[must_use]
    pub fn spawn(subscriptions: SubscriptionRegistry) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name("duplex-session-worker".to_owned())
            .spawn(move || run_worker(command_rx, event_tx, subscriptions))
            .expect("failed to spawn duplex-session worker thread");

        Self {
            commands: command_tx,
            events: event_rx,
            thread: Some(thread),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // The channel may already be closed if the worker thread died on
        // its own; that's fine, there's nothing left to dispose.
        let _ = self.commands.send(Command::Dispose);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Worker thread entry point: builds a current-thread runtime and
/// [`LocalSet`][tokio::task::LocalSet] (the `Session`/`Correlator` pair is
/// built on `Rc`/`RefCell`, so it cannot run on a multi-threaded executor),
/// and drives the command loop until [`Command::Dispose`] or the command
/// channel closes.
fn run_worker(
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<Event>,
    subscriptions: SubscriptionRegistry,
) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .enable_io()
        .build()
        .expect("failed to build duplex-session worker runtime");
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let transport_factory: TransportFactory = Rc::new(|url| {
            Box::pin(async move {
                WebSocketTransport::connect(&url)
                    .await
                    .map(|t| Rc::new(t) as Rc<dyn RpcTransport>)
            }) as futures::future::LocalBoxFuture<'static, _>
        });

        let session = Session::new(transport_factory);
        let correlator = Rc::new(Correlator::new(session.clone()));

        spawn_state_forwarder(&session, events.clone());

        while let Some(command) = commands.recv().await {
            if matches!(command, Command::Dispose) {
                session.disconnect();
                break;
            }
            handle_command(
                command,
                &session,
                &correlator,
                &subscriptions,
                &events,
            );
        }
    });
}

fn spawn_state_forwarder(
    session: &Session,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut states = session.on_state_change();
    tokio::task::spawn_local(async move {
        while let Some(status) = states.next().await {
            if events.send(Event::StateChanged { status }).is_err() {
                break;
            }
        }
    });
}

fn handle_command(
    command: Command,
    session: &Session,
    correlator: &Rc<Correlator>,
    subscriptions: &SubscriptionRegistry,
    events: &mpsc::UnboundedSender<Event>,
) {
    match command {
        Command::Dispose => unreachable!("handled by the caller"),

        Command::Connect { request_id, config } => {
            let session = session.clone();
            let events = events.clone();
            tokio::task::spawn_local(async move {
                let result = session
                    .connect(config)
                    .await
                    .map(|()| Value::Null)
                    .map_err(SessionRpcError::from);
                let _ = events.send(Event::Reply { request_id, result });
            });
        }

        Command::Disconnect { request_id } => {
            session.disconnect();
            let _ = events.send(Event::Reply {
                request_id,
                result: Ok(Value::Null),
            });
        }

        Command::SendRequest {
            request_id,
            command_type,
            params,
            timeout_ms,
        } => {
            let correlator = Rc::clone(correlator);
            let events = events.clone();
            tokio::task::spawn_local(async move {
                let result = correlator
                    .request(
                        command_type,
                        params,
                        Duration::from_millis(timeout_ms),
                    )
                    .await;
                let _ = events.send(Event::Reply { request_id, result });
            });
        }

        Command::Subscribe {
            request_id,
            subscription_name,
            params,
            internal_id,
            timeout_ms,
        } => {
            let spec = subscriptions.get(&subscription_name);
            let correlator = Rc::clone(correlator);
            let events = events.clone();
            tokio::task::spawn_local(async move {
                let result = match spec {
                    None => Err(SessionRpcError::DecodeFailure(format!(
                        "unknown subscription `{subscription_name}`"
                    ))),
                    Some(spec) => {
                        let notify = events.clone();
                        let sink: Box<dyn Fn(Value)> =
                            Box::new(move |payload| {
                                let _ = notify.send(Event::Notification {
                                    internal_id,
                                    data: payload,
                                });
                            });
                        correlator
                            .subscribe(
                                spec,
                                params,
                                sink,
                                Duration::from_millis(timeout_ms),
                            )
                            .await
                            .map(|subscription_id| {
                                serde_json::json!({
                                    "subscriptionId": subscription_id,
                                })
                            })
                    }
                };
                let _ = events.send(Event::Reply { request_id, result });
            });
        }

        Command::Unsubscribe {
            request_id,
            subscription_id,
        } => {
            correlator.unsubscribe(&subscription_id);
            let _ = events.send(Event::Reply {
                request_id,
                result: Ok(Value::Null),
            });
        }
    }
}
