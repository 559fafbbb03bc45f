//! Byte-framed transport abstraction and its native WebSocket
//! implementation.

pub mod websocket;

use derive_more::Display;
use futures::stream::LocalBoxStream;

use crate::error::TransportError;

/// States a [`RpcTransport`] moves through over its lifetime.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TransportState {
    /// Socket has been created; the connection is not open yet.
    #[display(fmt = "connecting")]
    Connecting,

    /// The connection is open and ready to communicate.
    #[display(fmt = "open")]
    Open,

    /// The connection is in the process of closing.
    #[display(fmt = "closing")]
    Closing,

    /// The connection is closed, or could not be opened.
    #[display(fmt = "closed")]
    Closed,
}

impl TransportState {
    /// Returns `true` if the socket can still be closed from this state.
    #[must_use]
    pub fn can_close(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// A single bidirectional byte-framed connection to one URL.
///
/// Implementors own exactly one connection at a time, deliver received
/// frames through [`on_message`][1] and lifecycle transitions through
/// [`on_state_change`][2], and accept outgoing frames through [`send`][3].
/// A transport has no knowledge of sessions, requests, or subscriptions —
/// that is the [`Session`] layer's job.
///
/// [1]: RpcTransport::on_message
/// [2]: RpcTransport::on_state_change
/// [3]: RpcTransport::send
/// [`Session`]: crate::session::Session
#[cfg_attr(feature = "mockable", mockall::automock)]
pub trait RpcTransport {
    /// Returns a [`LocalBoxStream`] of every text frame received by this
    /// transport, already decoded from bytes to `String`.
    fn on_message(&self) -> LocalBoxStream<'static, String>;

    /// Returns a [`LocalBoxStream`] of this transport's [`TransportState`]
    /// changes.
    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState>;

    /// Sends `msg` as a single text frame.
    ///
    /// # Errors
    ///
    /// Errors if the transport is not [`Open`][TransportState::Open], or if
    /// the underlying connection rejects the write.
    fn send(&self, msg: &str) -> Result<(), TransportError>;

    /// Initiates closing the underlying connection.
    fn close(&self);
}
