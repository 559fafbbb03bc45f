//! Wire message framing: the tagged [`ClientMsg`]/[`ServerMsg`] envelopes
//! exchanged with the server, JSON-encoded over individual WebSocket text
//! frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of an in-flight request/reply pair, assigned by the client.
pub type RequestId = u64;

/// Identifier of a session, assigned by the server on [`SessionCreateReply`].
///
/// [`SessionCreateReply`]: ServerMsg::SessionCreateReply
pub type SessionId = String;

/// Identifier of an active subscription, assigned by the server.
pub type SubscriptionId = String;

/// Messages sent from the client to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMsg {
    /// Opens a new session, proposing a client-chosen identifier the server
    /// may use for diagnostics; the server assigns the authoritative
    /// [`SessionId`] in its reply.
    SessionCreate {
        /// Request this message correlates with.
        request_id: RequestId,
    },

    /// Application-level request, opaque to the [`Session`] layer.
    ///
    /// [`Session`]: crate::session::Session
    Request {
        /// Request this message correlates with.
        request_id: RequestId,
        /// Session the request is scoped to.
        session_id: SessionId,
        /// Name of the command being invoked, used by the server-side
        /// dispatcher and echoed back for diagnostics.
        command: String,
        /// Command parameters.
        params: Value,
    },

    /// Heartbeat sent after a period of silence on an open session.
    SessionKeepalive {
        /// Request this message correlates with.
        request_id: RequestId,
        /// Session the keepalive is scoped to.
        session_id: SessionId,
    },

    /// Best-effort notice that the client is tearing the session down.
    SessionDestroy {
        /// Session being destroyed.
        session_id: SessionId,
    },
}

/// Messages sent from the server to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMsg {
    /// Reply to [`ClientMsg::SessionCreate`].
    SessionCreateReply {
        /// Request this message replies to.
        request_id: RequestId,
        /// Server-assigned session identifier.
        session_id: SessionId,
        /// Whether the session was created successfully.
        status: RawStatus,
    },

    /// Reply to [`ClientMsg::Request`], [`ClientMsg::SessionCreate`]'s
    /// application-level counterpart.
    Reply {
        /// Request this message replies to.
        request_id: RequestId,
        /// Session this reply is scoped to.
        session_id: SessionId,
        /// Outcome of the request.
        status: RawStatus,
        /// Application-defined payload, present on success.
        #[serde(default)]
        payload: Option<Value>,
    },

    /// Reply to [`ClientMsg::SessionKeepalive`].
    SessionKeepaliveReply {
        /// Request this message replies to.
        request_id: RequestId,
        /// Session this reply is scoped to.
        session_id: SessionId,
    },

    /// Asynchronous push tied to a subscription.
    Notification {
        /// Session this notification is scoped to.
        session_id: SessionId,
        /// Subscription this notification is routed through.
        subscription_id: SubscriptionId,
        /// Decoded-later application payload.
        payload: Value,
    },
}

/// Raw success/error status as it appears on the wire: a `code` string
/// (`"SUCCESS"` on success, anything else is an application error code) and
/// an optional human-readable `message`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RawStatus {
    /// Status code; the literal `"SUCCESS"` denotes success.
    pub code: String,
    /// Optional human-readable message, typically present on errors.
    #[serde(default)]
    pub message: Option<String>,
}

impl RawStatus {
    /// Status code denoting success.
    pub const SUCCESS: &'static str = "SUCCESS";

    /// Returns `true` if this status denotes success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }
}

/// Serializes a [`ClientMsg`] to the text frame sent over the wire.
///
/// # Errors
///
/// Errors if the message cannot be represented as JSON, which should not
/// happen for any value constructible through this crate's public API.
pub fn encode(msg: &ClientMsg) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Parses a [`ServerMsg`] out of an incoming text frame.
///
/// # Errors
///
/// Errors if `raw` is not valid JSON or doesn't match any [`ServerMsg`]
/// variant's shape.
pub fn decode(raw: &str) -> Result<ServerMsg, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_session_create() {
        let msg = ClientMsg::SessionCreate { request_id: 1 };
        let encoded = encode(&msg).unwrap();
        assert!(encoded.contains("SessionCreate"));
    }

    #[test]
    fn decodes_session_create_reply() {
        let raw = r#"{
            "type": "SessionCreateReply",
            "data": {
                "request_id": 1,
                "session_id": "sess-1",
                "status": {"code": "SUCCESS", "message": null}
            }
        }"#;
        let msg = decode(raw).unwrap();
        match msg {
            ServerMsg::SessionCreateReply {
                request_id,
                session_id,
                status,
            } => {
                assert_eq!(request_id, 1);
                assert_eq!(session_id, "sess-1");
                assert!(status.is_success());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decodes_notification() {
        let raw = r#"{
            "type": "Notification",
            "data": {
                "session_id": "sess-1",
                "subscription_id": "sub-7",
                "payload": {"value": 42}
            }
        }"#;
        let msg = decode(raw).unwrap();
        assert!(matches!(msg, ServerMsg::Notification { .. }));
    }

    #[test]
    fn rejects_malformed_frame() {
        assert!(decode("not json").is_err());
    }
}
