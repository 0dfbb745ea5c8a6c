//! Error taxonomy for the client.
//!
//! [`ClientError`] is the only error type callers ever see. Its variants are
//! split by blast radius:
//!
//! - **Connection-fatal**: [`ClientError::HandshakeTimeout`],
//!   [`ClientError::ConnectionClosed`], [`ClientError::ConnectionLost`],
//!   [`ClientError::Transport`]. Every pending operation receives one of these.
//! - **Operation-scoped**: [`ClientError::Operation`],
//!   [`ClientError::ProtocolViolation`], [`ClientError::ClosedBeforeData`].
//!   Only the named operation fails.
//! - **Submission-time**: [`ClientError::NotConnected`],
//!   [`ClientError::DuplicateOperation`], [`ClientError::Serialization`],
//!   [`ClientError::InvalidRequest`].
//!
//! [`ClientError::MalformedMessage`] is produced by the frame parser and only
//! ever logged; no operation is failed with it.
//!
//! The type is `Clone` because a single close cause fans out to every
//! in-flight operation.

mod graphql;

pub use graphql::{ErrorLocation, GraphqlError};

use thiserror::Error;

use crate::ids::OperationId;

// ── Error code constants ────────────────────────────────────────────

/// No `connection_ack` within the configured window.
pub const HANDSHAKE_TIMEOUT: &str = "HANDSHAKE_TIMEOUT";
/// Graceful close reached a single-result operation before its data.
pub const CLOSED_BEFORE_DATA: &str = "CLOSED_BEFORE_DATA";
/// Peer closed with a non-normal code.
pub const CONNECTION_CLOSED: &str = "CONNECTION_CLOSED";
/// Transport ended without a close frame.
pub const CONNECTION_LOST: &str = "CONNECTION_LOST";
/// Underlying transport reported an error.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
/// Server broke the message protocol for one operation.
pub const PROTOCOL_VIOLATION: &str = "PROTOCOL_VIOLATION";
/// Server reported application errors for one operation.
pub const OPERATION_ERROR: &str = "OPERATION_ERROR";
/// Inbound frame could not be parsed.
pub const MALFORMED_MESSAGE: &str = "MALFORMED_MESSAGE";
/// Submission against a failed or closed connection.
pub const NOT_CONNECTED: &str = "NOT_CONNECTED";
/// Correlation ID collision in the registry.
pub const DUPLICATE_OPERATION: &str = "DUPLICATE_OPERATION";
/// Outbound frame could not be serialized.
pub const SERIALIZATION_ERROR: &str = "SERIALIZATION_ERROR";
/// Connection request (URL, headers) was invalid.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

/// Client-visible error.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ClientError {
    /// The server did not acknowledge `connection_init` in time.
    #[error("server did not send a connection_ack message within {timeout_ms}ms")]
    HandshakeTimeout {
        /// Configured handshake window.
        timeout_ms: u64,
    },

    /// The connection closed normally while a single result was still owed.
    #[error("connection closed before data was received")]
    ClosedBeforeData,

    /// The peer closed the connection with a non-normal code.
    #[error("server closed the websocket connection with code: {code} and reason: {reason}")]
    ConnectionClosed {
        /// WebSocket close code.
        code: u16,
        /// Close reason text (may be empty).
        reason: String,
    },

    /// The transport ended without a close frame.
    #[error("connection closed")]
    ConnectionLost,

    /// The transport reported an I/O or framing error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server broke the protocol for a single operation.
    #[error("protocol error: {0}")]
    ProtocolViolation(String),

    /// The server reported errors for a single operation.
    #[error("received an error: {}", graphql::summarize(.errors))]
    Operation {
        /// Errors in the order the server sent them.
        errors: Vec<GraphqlError>,
    },

    /// An inbound frame could not be parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The connection is failed or closed; no new operations are accepted.
    #[error("connection is {state}: {reason}")]
    NotConnected {
        /// Connection state name.
        state: String,
        /// Why the connection left the usable state.
        reason: String,
    },

    /// An operation with the same ID is already registered.
    #[error("operation {id} is already registered")]
    DuplicateOperation {
        /// Colliding correlation ID.
        id: OperationId,
    },

    /// An outbound message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialization(String),

    /// The connection request could not be built.
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HandshakeTimeout { .. } => HANDSHAKE_TIMEOUT,
            Self::ClosedBeforeData => CLOSED_BEFORE_DATA,
            Self::ConnectionClosed { .. } => CONNECTION_CLOSED,
            Self::ConnectionLost => CONNECTION_LOST,
            Self::Transport(_) => TRANSPORT_ERROR,
            Self::ProtocolViolation(_) => PROTOCOL_VIOLATION,
            Self::Operation { .. } => OPERATION_ERROR,
            Self::MalformedMessage(_) => MALFORMED_MESSAGE,
            Self::NotConnected { .. } => NOT_CONNECTED,
            Self::DuplicateOperation { .. } => DUPLICATE_OPERATION,
            Self::Serialization(_) => SERIALIZATION_ERROR,
            Self::InvalidRequest(_) => INVALID_REQUEST,
        }
    }

    /// Whether this error takes down the whole connection rather than a
    /// single operation.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::ConnectionLost
                | Self::Transport(_)
        )
    }

    /// Close code carried by the error, if any.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Server-reported errors, empty for every other variant.
    pub fn graphql_errors(&self) -> &[GraphqlError] {
        match self {
            Self::Operation { errors } => errors,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_close_mentions_code_and_reason() {
        let err = ClientError::ConnectionClosed {
            code: 1011,
            reason: "internal".into(),
        };
        assert_eq!(
            err.to_string(),
            "server closed the websocket connection with code: 1011 and reason: internal"
        );
        assert_eq!(err.close_code(), Some(1011));
        assert_eq!(err.code(), CONNECTION_CLOSED);
    }

    #[test]
    fn operation_error_summarizes_in_order() {
        let err = ClientError::Operation {
            errors: vec![GraphqlError::new("first"), GraphqlError::new("second")],
        };
        assert_eq!(err.to_string(), "received an error: first; second");
        assert_eq!(err.graphql_errors().len(), 2);
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn connection_fatal_classification() {
        assert!(ClientError::HandshakeTimeout { timeout_ms: 10 }.is_connection_fatal());
        assert!(ClientError::ConnectionLost.is_connection_fatal());
        assert!(ClientError::Transport("reset".into()).is_connection_fatal());
        assert!(!ClientError::ClosedBeforeData.is_connection_fatal());
        assert!(!ClientError::ProtocolViolation("x".into()).is_connection_fatal());
        assert!(!ClientError::MalformedMessage("x".into()).is_connection_fatal());
    }

    #[test]
    fn closed_before_data_text() {
        assert_eq!(
            ClientError::ClosedBeforeData.to_string(),
            "connection closed before data was received"
        );
    }

    #[test]
    fn serde_error_converts_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ClientError = json_err.into();
        assert_eq!(err.code(), SERIALIZATION_ERROR);
    }

    #[test]
    fn not_connected_display() {
        let err = ClientError::NotConnected {
            state: "failed".into(),
            reason: "handshake timed out".into(),
        };
        assert_eq!(err.to_string(), "connection is failed: handshake timed out");
    }
}
