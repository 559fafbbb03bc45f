//! End-to-end scenarios for the session/correlator pair, driven against a
//! hand-rolled [`FakeTransport`] instead of a real socket so they run
//! deterministically without network access — the same role the teacher's
//! own integration suite gives its mock transports, just swapped from
//! `wasm_bindgen_test` to native `tokio::test`.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use duplex_session::{
    codec::{ClientMsg, RawStatus, ServerMsg},
    config::SessionConfig,
    correlator::{subscription::SubSpec, Correlator},
    error::TransportError,
    session::{Session, SessionStatus, TransportFactory},
    transport::{RpcTransport, TransportState},
};
use futures::{channel::mpsc, stream::LocalBoxStream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::LocalSet;
use url::Url;

fn success_status() -> RawStatus {
    RawStatus {
        code: RawStatus::SUCCESS.to_owned(),
        message: None,
    }
}

fn test_url() -> Url {
    Url::parse("ws://example.test/ws/").unwrap()
}

/// Routes the crate's `log` output through the test harness, so a failing
/// scenario's `warn!`/`debug!` traces (dropped frames, reconnect attempts,
/// keepalive trips) show up in `cargo test` output instead of being
/// silently discarded. Safe to call from every test: `try_init` is a no-op
/// past the first call.
fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type Responder = Rc<dyn Fn(ClientMsg, &FakeTransport)>;

/// In-memory stand-in for [`RpcTransport`]: `send` decodes what would have
/// gone out over the wire and, if a responder is installed, hands it the
/// decoded message so tests can script server behavior without a real
/// socket.
#[derive(Clone)]
struct FakeTransport(Rc<FakeInner>);

struct FakeInner {
    state: Cell<TransportState>,
    state_subs: RefCell<Vec<mpsc::UnboundedSender<TransportState>>>,
    message_subs: RefCell<Vec<mpsc::UnboundedSender<String>>>,
    sent: RefCell<Vec<String>>,
    responder: RefCell<Option<Responder>>,
}

impl FakeTransport {
    fn new() -> Self {
        Self(Rc::new(FakeInner {
            state: Cell::new(TransportState::Open),
            state_subs: RefCell::new(Vec::new()),
            message_subs: RefCell::new(Vec::new()),
            sent: RefCell::new(Vec::new()),
            responder: RefCell::new(None),
        }))
    }

    fn set_responder(&self, responder: Responder) {
        *self.0.responder.borrow_mut() = Some(responder);
    }

    fn push_server_message(&self, msg: &ServerMsg) {
        let text = serde_json::to_string(msg).expect("ServerMsg always encodes");
        self.0
            .message_subs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(text.clone()).is_ok());
    }

    fn set_state(&self, state: TransportState) {
        self.0.state.set(state);
        self.0
            .state_subs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(state).is_ok());
    }

    fn sent_messages(&self) -> Vec<String> {
        self.0.sent.borrow().clone()
    }
}

impl RpcTransport for FakeTransport {
    fn on_message(&self) -> LocalBoxStream<'static, String> {
        let (tx, rx) = mpsc::unbounded();
        self.0.message_subs.borrow_mut().push(tx);
        rx.boxed_local()
    }

    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState> {
        let (tx, rx) = mpsc::unbounded();
        let _ = tx.unbounded_send(self.0.state.get());
        self.0.state_subs.borrow_mut().push(tx);
        rx.boxed_local()
    }

    fn send(&self, msg: &str) -> Result<(), TransportError> {
        if self.0.state.get() != TransportState::Open {
            return Err(TransportError::ClosedSocket);
        }
        self.0.sent.borrow_mut().push(msg.to_owned());
        if let Ok(client_msg) = serde_json::from_str::<ClientMsg>(msg) {
            let responder = self.0.responder.borrow().clone();
            if let Some(responder) = responder {
                responder(client_msg, self);
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.set_state(TransportState::Closed);
    }
}

/// Responder that immediately accepts `SessionCreate` with `session_id` and
/// otherwise does nothing.
fn session_create_responder(session_id: String) -> Responder {
    Rc::new(move |msg, transport| {
        if let ClientMsg::SessionCreate { request_id } = msg {
            transport.push_server_message(&ServerMsg::SessionCreateReply {
                request_id,
                session_id: session_id.clone(),
                status: success_status(),
            });
        }
    })
}

/// Yields control back to the executor a few times, enough for a chain of
/// local unbounded-channel sends/spawned tasks to fully propagate.
async fn drain_local_tasks() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn always_failing_factory() -> TransportFactory {
    Rc::new(|url| {
        Box::pin(async move {
            Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_owned(),
            })
        }) as futures::future::LocalBoxFuture<'static, _>
    })
}

struct EchoSpec;

impl SubSpec for EchoSpec {
    fn subscribe(&self, params: Value) -> (String, Value) {
        ("FlowSubscribe".to_owned(), params)
    }

    fn unsubscribe(&self, subscription_id: &str) -> (String, Value) {
        (
            "FlowUnsubscribe".to_owned(),
            json!({ "subscriptionId": subscription_id }),
        )
    }
}

#[tokio::test(flavor = "current_thread")]
async fn s1_happy_path_connect_call_disconnect() {
    init_test_logging();
    let local = LocalSet::new();
    local
        .run_until(async {
            let transport = FakeTransport::new();
            transport.set_responder({
                let base = session_create_responder("S1".to_owned());
                Rc::new(move |msg, t| {
                    base(msg.clone(), t);
                    if let ClientMsg::Request {
                        request_id,
                        session_id,
                        command,
                        ..
                    } = msg
                    {
                        if command == "Ping" {
                            t.push_server_message(&ServerMsg::Reply {
                                request_id,
                                session_id,
                                status: success_status(),
                                payload: Some(json!("pong")),
                            });
                        }
                    }
                })
            });

            let factory: TransportFactory = {
                let transport = transport.clone();
                Rc::new(move |_url| {
                    let transport = transport.clone();
                    Box::pin(async move {
                        Ok(Rc::new(transport) as Rc<dyn RpcTransport>)
                    }) as futures::future::LocalBoxFuture<'static, _>
                })
            };

            let session = Session::new(factory);
            let correlator = Correlator::new(session.clone());

            let config = SessionConfig::new(test_url());
            session.connect(config).await.expect("connect succeeds");
            assert_eq!(
                session.status(),
                SessionStatus::Connected {
                    session_id: "S1".to_owned()
                }
            );

            let reply = correlator
                .request("Ping", Value::Null, Duration::from_millis(200))
                .await
                .expect("ping succeeds");
            assert_eq!(reply, json!("pong"));

            session.disconnect();
            assert_eq!(session.status(), SessionStatus::Disconnected);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn s2_keepalive_trip_reconnects_without_waiting_out_backoff() {
    init_test_logging();
    let local = LocalSet::new();
    local
        .run_until(async {
            let call_count = Rc::new(Cell::new(0u32));
            let factory: TransportFactory = {
                let call_count = Rc::clone(&call_count);
                Rc::new(move |_url| {
                    let call_count = Rc::clone(&call_count);
                    Box::pin(async move {
                        let n = call_count.get() + 1;
                        call_count.set(n);
                        let session_id = if n == 1 { "S1" } else { "S2" };
                        let transport = FakeTransport::new();
                        transport.set_responder(session_create_responder(
                            session_id.to_owned(),
                        ));
                        Ok(Rc::new(transport) as Rc<dyn RpcTransport>)
                    }) as futures::future::LocalBoxFuture<'static, _>
                })
            };

            let session = Session::new(factory);
            let config = SessionConfig {
                url: test_url(),
                max_reconnect_attempts: 3,
                // Deliberately large: an ordinary transport close would
                // make the test wait this long before retrying. A
                // keepalive-triggered close must not go through that path.
                reconnect_interval_ms: 2_000,
                keepalive_interval_ms: 20,
                max_keepalive_failures: 1,
            };

            session.connect(config).await.expect("initial connect succeeds");
            assert_eq!(
                session.status(),
                SessionStatus::Connected {
                    session_id: "S1".to_owned()
                }
            );

            let mut states = session.on_state_change();
            let reconnected = tokio::time::timeout(Duration::from_millis(500), async {
                loop {
                    match states.next().await {
                        Some(SessionStatus::Connected { session_id })
                            if session_id == "S2" =>
                        {
                            return;
                        }
                        Some(_) => continue,
                        None => return,
                    }
                }
            })
            .await;

            assert!(
                reconnected.is_ok(),
                "keepalive-triggered reconnect must not wait out \
                 reconnect_interval_ms before retrying"
            );
            assert_eq!(
                session.status(),
                SessionStatus::Connected {
                    session_id: "S2".to_owned()
                }
            );
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn s3_exhausted_reconnects_reaches_disconnected() {
    init_test_logging();
    let local = LocalSet::new();
    local
        .run_until(async {
            let session = Session::new(always_failing_factory());
            let config = SessionConfig {
                url: test_url(),
                max_reconnect_attempts: 1,
                reconnect_interval_ms: 50,
                keepalive_interval_ms: 1_000,
                max_keepalive_failures: 3,
            };

            let result = session.connect(config).await;
            assert!(result.is_err());
            assert_eq!(session.status(), SessionStatus::Disconnected);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn s4_request_times_out_and_late_reply_is_dropped() {
    init_test_logging();
    let local = LocalSet::new();
    local
        .run_until(async {
            let last_request: Rc<RefCell<Option<(u64, String)>>> =
                Rc::new(RefCell::new(None));

            let transport = FakeTransport::new();
            transport.set_responder({
                let base = session_create_responder("S1".to_owned());
                let last_request = Rc::clone(&last_request);
                Rc::new(move |msg, t| {
                    base(msg.clone(), t);
                    if let ClientMsg::Request {
                        request_id,
                        session_id,
                        command,
                        ..
                    } = msg
                    {
                        if command == "Ping" {
                            // Silence: the server never replies in time.
                            *last_request.borrow_mut() =
                                Some((request_id, session_id));
                        }
                    }
                })
            });

            let factory: TransportFactory = {
                let transport = transport.clone();
                Rc::new(move |_url| {
                    let transport = transport.clone();
                    Box::pin(async move {
                        Ok(Rc::new(transport) as Rc<dyn RpcTransport>)
                    }) as futures::future::LocalBoxFuture<'static, _>
                })
            };

            let session = Session::new(factory);
            let correlator = Correlator::new(session.clone());
            session
                .connect(SessionConfig::new(test_url()))
                .await
                .expect("connect succeeds");

            let result = correlator
                .request("Ping", Value::Null, Duration::from_millis(100))
                .await;
            match result {
                Err(duplex_session::error::SessionRpcError::Timeout {
                    command,
                    timeout_ms,
                }) => {
                    assert_eq!(command, "Ping");
                    assert_eq!(timeout_ms, 100);
                }
                other => panic!("expected Timeout, got {other:?}"),
            }

            // A reply for the timed-out request arriving late must not
            // resolve anything or panic.
            let (request_id, session_id) = last_request
                .borrow()
                .clone()
                .expect("server observed the Ping request");
            transport.push_server_message(&ServerMsg::Reply {
                request_id,
                session_id,
                status: success_status(),
                payload: Some(json!("too-late")),
            });
            drain_local_tasks().await;
            assert!(matches!(
                session.status(),
                SessionStatus::Connected { .. }
            ));
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn s5_subscription_lifecycle() {
    init_test_logging();
    let local = LocalSet::new();
    local
        .run_until(async {
            let transport = FakeTransport::new();
            transport.set_responder({
                let base = session_create_responder("S1".to_owned());
                Rc::new(move |msg, t| {
                    base(msg.clone(), t);
                    if let ClientMsg::Request {
                        request_id,
                        session_id,
                        command,
                        ..
                    } = msg
                    {
                        if command == "FlowSubscribe" {
                            t.push_server_message(&ServerMsg::Reply {
                                request_id,
                                session_id,
                                status: success_status(),
                                payload: Some(json!({ "subscriptionId": "sub-7" })),
                            });
                        }
                    }
                })
            });

            let factory: TransportFactory = {
                let transport = transport.clone();
                Rc::new(move |_url| {
                    let transport = transport.clone();
                    Box::pin(async move {
                        Ok(Rc::new(transport) as Rc<dyn RpcTransport>)
                    }) as futures::future::LocalBoxFuture<'static, _>
                })
            };

            let session = Session::new(factory);
            let correlator = Correlator::new(session.clone());
            session
                .connect(SessionConfig::new(test_url()))
                .await
                .expect("connect succeeds");

            let received = Rc::new(RefCell::new(Vec::new()));
            let sink: Box<dyn Fn(Value)> = {
                let received = Rc::clone(&received);
                Box::new(move |payload| received.borrow_mut().push(payload))
            };

            let subscription_id = correlator
                .subscribe(
                    Arc::new(EchoSpec),
                    Value::Null,
                    sink,
                    Duration::from_millis(200),
                )
                .await
                .expect("subscribe succeeds");
            assert_eq!(subscription_id, "sub-7");

            for i in 0..3 {
                transport.push_server_message(&ServerMsg::Notification {
                    session_id: "S1".to_owned(),
                    subscription_id: subscription_id.clone(),
                    payload: json!(i),
                });
            }
            drain_local_tasks().await;
            assert_eq!(
                *received.borrow(),
                vec![json!(0), json!(1), json!(2)]
            );

            correlator.unsubscribe(&subscription_id);
            transport.push_server_message(&ServerMsg::Notification {
                session_id: "S1".to_owned(),
                subscription_id: subscription_id.clone(),
                payload: json!(99),
            });
            drain_local_tasks().await;
            assert_eq!(received.borrow().len(), 3, "late notification dropped");

            assert!(transport
                .sent_messages()
                .iter()
                .any(|m| m.contains("FlowUnsubscribe")));
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn s6_session_mismatch_does_not_reset_keepalive_counter() {
    init_test_logging();
    let local = LocalSet::new();
    local
        .run_until(async {
            let transport = FakeTransport::new();
            transport.set_responder(session_create_responder("S1".to_owned()));

            let factory: TransportFactory = {
                let transport = transport.clone();
                Rc::new(move |_url| {
                    let transport = transport.clone();
                    Box::pin(async move {
                        Ok(Rc::new(transport) as Rc<dyn RpcTransport>)
                    }) as futures::future::LocalBoxFuture<'static, _>
                })
            };

            let session = Session::new(factory);
            let config = SessionConfig {
                url: test_url(),
                max_reconnect_attempts: 3,
                reconnect_interval_ms: 2_000,
                keepalive_interval_ms: 20,
                max_keepalive_failures: 2,
            };
            session.connect(config).await.expect("connect succeeds");

            // A forged keepalive reply for a session that isn't current:
            // must be ignored, not counted as liveness evidence.
            transport.push_server_message(&ServerMsg::SessionKeepaliveReply {
                request_id: 999,
                session_id: "forged-session".to_owned(),
            });
            drain_local_tasks().await;

            // With max_keepalive_failures = 2, if the forged reply had
            // (incorrectly) reset the failure counter, the session would
            // never trip. It must still trip within a couple of intervals.
            let mut states = session.on_state_change();
            let tripped = tokio::time::timeout(Duration::from_millis(500), async {
                loop {
                    match states.next().await {
                        Some(SessionStatus::KeepaliveFailed) => return,
                        Some(_) => continue,
                        None => return,
                    }
                }
            })
            .await;
            assert!(
                tripped.is_ok(),
                "mismatched keepalive reply must not suppress the trip"
            );
        })
        .await;
}
