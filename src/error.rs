//! Error types shared by every layer of the session transport.

use derive_more::{Display, From};
use tracerr::Traced;

/// Errors that can occur while working with the underlying byte transport.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum TransportError {
    /// Failed to establish the underlying connection.
    #[display(fmt = "failed to connect to {}: {}", url, reason)]
    Connect {
        /// URL that was being connected to.
        url: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A frame could not be serialized before being sent.
    #[display(fmt = "failed to serialize outgoing frame: {}", _0)]
    Encode(String),

    /// A frame received from the wire could not be parsed.
    #[display(fmt = "failed to parse incoming frame: {}", _0)]
    Decode(String),

    /// A received message was not a text/binary frame this transport
    /// understands (e.g. a WebSocket ping/pong/close control frame leaking
    /// through).
    #[display(fmt = "received message is not a data frame")]
    NotDataFrame,

    /// [`send`][1] was called while the transport was not open.
    ///
    /// [1]: super::transport::RpcTransport::send
    #[display(fmt = "underlying socket is closed")]
    ClosedSocket,
}

/// Errors occurring inside the [`Session`] state machine.
///
/// [`Session`]: crate::session::Session
#[derive(Clone, Debug, Display, From, PartialEq)]
pub enum SessionError {
    /// Underlying [`RpcTransport`] produced an error.
    ///
    /// [`RpcTransport`]: crate::transport::RpcTransport
    #[display(fmt = "transport error: {}", _0)]
    Transport(TransportError),

    /// Reconnect attempts were exhausted without re-establishing a session.
    #[display(fmt = "reconnect attempts exhausted")]
    ReconnectExhausted,

    /// Keepalive failure threshold was reached.
    #[display(fmt = "keepalive failures exceeded threshold")]
    KeepaliveFailed,

    /// The connect attempt was aborted by an explicit `disconnect()` before
    /// it reached [`Connected`][crate::session::SessionStatus::Connected]
    /// or exhausted its reconnect budget.
    #[display(fmt = "connect aborted by disconnect()")]
    Cancelled,
}

/// Flat, boundary-safe error surfaced to a caller of the session facade.
///
/// Unlike [`SessionError`]/[`TransportError`], this type never carries a
/// [`Traced`] wrapper or borrowed data, so it is free to cross the
/// worker/host channel boundary.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum SessionRpcError {
    /// A request was issued while the session was not [`Connected`].
    ///
    /// [`Connected`]: crate::session::SessionStatus::Connected
    #[display(fmt = "not connected")]
    NotConnected,

    /// A request exceeded its allotted timeout without a matching reply.
    #[display(fmt = "request {} timed out after {}ms", command, timeout_ms)]
    Timeout {
        /// Name of the command that timed out.
        command: String,
        /// Timeout that was configured for the request.
        timeout_ms: u64,
    },

    /// A reply or notification could not be decoded into its expected type.
    #[display(fmt = "failed to decode reply: {}", _0)]
    DecodeFailure(String),

    /// The server replied with a non-success status.
    #[display(fmt = "server error [{}]: {}", code, message)]
    ServerError {
        /// Verbatim error code echoed from the server reply.
        code: String,
        /// Human-readable message accompanying the code.
        message: String,
    },

    /// The pending request was aborted because the session dropped.
    #[display(fmt = "connection closed")]
    ConnectionClosed,

    /// The background worker terminated unexpectedly.
    #[display(fmt = "worker thread is gone")]
    WorkerLost,
}

impl SessionRpcError {
    /// Machine-readable code for this error, stable across releases.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::DecodeFailure(_) => "DECODE_FAILURE",
            Self::ServerError { .. } => "SERVER_ERROR",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::WorkerLost => "WORKER_LOST",
        }
    }
}

impl From<Traced<SessionError>> for SessionRpcError {
    fn from(err: Traced<SessionError>) -> Self {
        let (err, _trace) = err.into_parts();
        match err {
            // A transport failure surfacing here always means every
            // reconnect attempt was exhausted before a session could be
            // established (see `Session::drive_connect_once`) — from the
            // caller's point of view that is indistinguishable from a
            // session that connected and then dropped.
            SessionError::Transport(_) => Self::ConnectionClosed,
            SessionError::ReconnectExhausted => Self::ConnectionClosed,
            SessionError::KeepaliveFailed => Self::ConnectionClosed,
            SessionError::Cancelled => Self::ConnectionClosed,
        }
    }
}
