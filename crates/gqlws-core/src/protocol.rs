//! `graphql-transport-ws` wire messages.
//!
//! Every frame is a JSON text message with a `type` discriminator. Frames the
//! client sends are [`ClientMessage`]; frames it receives are
//! [`ServerMessage`]. The protocol allows `ping` in both directions, but
//! this client only answers server pings. A client never legitimately receives `connection_init` or
//! `subscribe`, but they still parse so the router can ignore them.
//!
//! Protocol reference: <https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md>

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::errors::{ClientError, GraphqlError};
use crate::ids::OperationId;
use crate::request::GraphqlRequest;

/// WebSocket subprotocol name negotiated during the upgrade.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// Close code for a graceful shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code used when the handshake is not acknowledged in time.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Close reason sent together with [`CLOSE_PROTOCOL_ERROR`] on handshake timeout.
pub const HANDSHAKE_TIMEOUT_REASON: &str = "Timeout waiting for a connection_ack message";

/// Default payload of a keepalive `pong`.
pub fn keepalive_payload() -> Value {
    json!({ "message": "keepalive" })
}

/// A WebSocket close code plus reason text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code.
    pub code: u16,
    /// Reason text (may be empty).
    pub reason: String,
}

impl CloseFrame {
    /// Create a close frame.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A graceful close with no reason.
    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "")
    }

    /// Whether this is a graceful close.
    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Frames sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the handshake.
    ConnectionInit {
        /// Optional connection parameters (auth tokens and the like).
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Keepalive reply. The client only answers pings, it never sends them.
    Pong {
        /// Optional payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Starts an operation.
    Subscribe {
        /// Correlation ID.
        id: OperationId,
        /// The request to execute.
        payload: GraphqlRequest,
    },
    /// Stops an operation.
    Complete {
        /// Correlation ID.
        id: OperationId,
    },
}

impl ClientMessage {
    /// Serialize to the text frame body.
    pub fn to_json(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionInit { .. } => "connection_init",
            Self::Pong { .. } => "pong",
            Self::Subscribe { .. } => "subscribe",
            Self::Complete { .. } => "complete",
        }
    }
}

/// Frames received from the server.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    ConnectionAck {
        /// Optional server parameters.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Keepalive check; must be answered with a pong.
    Ping {
        /// Optional payload.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Keepalive reply.
    Pong {
        /// Optional payload.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// One result for an operation.
    Next {
        /// Correlation ID.
        id: OperationId,
        /// Raw execution result, passed through untouched.
        payload: Value,
    },
    /// Operation failed with one or more errors.
    Error {
        /// Correlation ID.
        id: OperationId,
        /// Errors in server order.
        #[serde(deserialize_with = "one_or_many")]
        payload: Vec<GraphqlError>,
    },
    /// Operation finished.
    Complete {
        /// Correlation ID.
        id: OperationId,
    },
    /// Client-only frame, ignored when received.
    ConnectionInit {
        /// Ignored.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Client-only frame, ignored when received.
    Subscribe {
        /// Ignored.
        #[serde(default)]
        id: Option<OperationId>,
        /// Ignored.
        #[serde(default)]
        payload: Option<Value>,
    },
}

impl ServerMessage {
    /// Parse a text frame.
    ///
    /// Anything that is not a JSON object with a known `type` and the fields
    /// that type requires is reported as [`ClientError::MalformedMessage`].
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        serde_json::from_str(text).map_err(|e| ClientError::MalformedMessage(e.to_string()))
    }

    /// Wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionAck { .. } => "connection_ack",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Next { .. } => "next",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
            Self::ConnectionInit { .. } => "connection_init",
            Self::Subscribe { .. } => "subscribe",
        }
    }
}

/// Accept an `error` payload as either an array or a lone error object.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<GraphqlError>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<GraphqlError>),
        One(GraphqlError),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(errors) => errors,
        OneOrMany::One(error) => vec![error],
    })
}
