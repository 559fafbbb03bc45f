//! Native [`tokio-tungstenite`]-backed [`RpcTransport`] implementation.
//!
//! Grounded in the browser-side `WebSocketRpcTransport`'s event-listener
//! fan-out (one [`ObservableCell`] for state, a `Vec` of per-subscriber
//! senders for messages), adapted to run atop a real OS socket instead of
//! the `web_sys::WebSocket` JS binding.
//!
//! [`tokio-tungstenite`]: tokio_tungstenite

use std::{cell::RefCell, rc::Rc};

use futures::{
    channel::mpsc, stream::LocalBoxStream, SinkExt, StreamExt,
};
use medea_reactive::ObservableCell;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message as WsMessage,
};
use url::Url;

use crate::error::TransportError;

use super::{RpcTransport, TransportState};

/// Native WebSocket transport, driving one [`tokio_tungstenite`] connection.
///
/// Must be constructed and used from within a single-threaded `tokio`
/// [`LocalSet`][1], matching every other `Rc`/`RefCell`-based component in
/// this crate.
///
/// [1]: tokio::task::LocalSet
#[derive(Clone)]
pub struct WebSocketTransport(Rc<Inner>);

struct Inner {
    state: ObservableCell<TransportState>,
    message_subs: RefCell<Vec<mpsc::UnboundedSender<String>>>,
    outgoing: mpsc::UnboundedSender<WsMessage>,
    reader_task: RefCell<Option<JoinHandle<()>>>,
    writer_task: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Opens a new WebSocket connection to `url`.
    ///
    /// Resolves once the connection is established; lifecycle events after
    /// that point are observed through [`RpcTransport::on_state_change`].
    ///
    /// # Errors
    ///
    /// Errors if the TCP/TLS handshake or the WebSocket upgrade fails.
    pub async fn connect(url: &Url) -> Result<Self, TransportError> {
        let (stream, _response) =
            connect_async(url.as_str()).await.map_err(|e| {
                TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let (mut write, mut read) = stream.split();
        let (outgoing_tx, mut outgoing_rx) =
            mpsc::unbounded::<WsMessage>();

        let state = ObservableCell::new(TransportState::Open);
        let message_subs: RefCell<Vec<mpsc::UnboundedSender<String>>> =
            RefCell::new(Vec::new());

        let writer_task = tokio::task::spawn_local(async move {
            while let Some(msg) = outgoing_rx.next().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let inner = Rc::new(Inner {
            state,
            message_subs,
            outgoing: outgoing_tx,
            reader_task: RefCell::new(None),
            writer_task,
        });

        let reader_inner = Rc::clone(&inner);
        let reader_task = tokio::task::spawn_local(async move {
            while let Some(item) = read.next().await {
                match item {
                    Ok(WsMessage::Text(text)) => {
                        reader_inner.dispatch_message(text);
                    }
                    Ok(WsMessage::Close(_)) => {
                        reader_inner.state.set(TransportState::Closed);
                        break;
                    }
                    Ok(_) => {
                        // Ping/Pong/Binary control frames carry no
                        // application data for this protocol.
                    }
                    Err(_) => {
                        reader_inner.state.set(TransportState::Closed);
                        break;
                    }
                }
            }
            reader_inner.state.set(TransportState::Closed);
        });
        *inner.reader_task.borrow_mut() = Some(reader_task);

        Ok(Self(inner))
    }
}

impl Inner {
    fn dispatch_message(&self, text: String) {
        self.message_subs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(text.clone()).is_ok());
    }
}

impl RpcTransport for WebSocketTransport {
    fn on_message(&self) -> LocalBoxStream<'static, String> {
        let (tx, rx) = mpsc::unbounded();
        self.0.message_subs.borrow_mut().push(tx);
        rx.boxed_local()
    }

    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState> {
        self.0.state.subscribe()
    }

    fn send(&self, msg: &str) -> Result<(), TransportError> {
        if self.0.state.get() != TransportState::Open {
            return Err(TransportError::ClosedSocket);
        }
        self.0
            .outgoing
            .unbounded_send(WsMessage::Text(msg.to_owned()))
            .map_err(|_| TransportError::ClosedSocket)
    }

    fn close(&self) {
        self.0.state.set(TransportState::Closing);
        if let Some(task) = self.0.reader_task.borrow_mut().take() {
            task.abort();
        }
        self.0.writer_task.abort();
        self.0.state.set(TransportState::Closed);
    }
}
