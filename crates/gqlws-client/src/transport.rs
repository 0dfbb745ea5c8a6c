//! Channel boundary between the client and whatever carries its frames.
//!
//! The client never owns a socket. [`GraphqlWsClient::start`] hands back a
//! [`TransportChannels`] pair: the transport drains `outbound` and feeds
//! `inbound`. Every writer inside the client (submission, cancellation,
//! keepalive, teardown) goes through the one outbound queue, so writes are
//! serialized by construction.
//!
//! [`GraphqlWsClient::start`]: crate::GraphqlWsClient::start

use gqlws_core::ClientError;
use gqlws_core::ConnectionId;
use gqlws_core::protocol::{ClientMessage, CloseFrame};
use tokio::sync::mpsc;
use tracing::trace;

/// A frame the transport must write.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundFrame {
    /// A JSON text frame.
    Text(String),
    /// Close the connection with this code and reason.
    Close(CloseFrame),
}

/// Something the transport observed.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Text(String),
    /// The connection ended. `None` means no close frame was received.
    Closed(Option<CloseFrame>),
    /// The transport failed.
    Error(String),
}

/// Transport side of a client.
///
/// Dropping `inbound` is treated as [`TransportEvent::Closed`] with no frame.
#[derive(Debug)]
pub struct TransportChannels {
    /// Frames to write, in order.
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    /// Events to deliver to the client.
    pub inbound: mpsc::Sender<TransportEvent>,
}

/// Client-side writer over the outbound queue.
#[derive(Clone, Debug)]
pub(crate) struct Outbound {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    connection_id: ConnectionId,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::UnboundedSender<OutboundFrame>, connection_id: ConnectionId) -> Self {
        Self { tx, connection_id }
    }

    /// Serialize and enqueue a protocol message.
    pub(crate) fn send(&self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = message.to_json()?;
        trace!(
            connection_id = %self.connection_id,
            message_type = message.kind(),
            ">>> {text}"
        );
        self.tx
            .send(OutboundFrame::Text(text))
            .map_err(|_| ClientError::ConnectionLost)
    }

    /// Enqueue a close frame.
    pub(crate) fn close(&self, frame: CloseFrame) -> Result<(), ClientError> {
        trace!(connection_id = %self.connection_id, code = frame.code, ">>> close");
        self.tx
            .send(OutboundFrame::Close(frame))
            .map_err(|_| ClientError::ConnectionLost)
    }
}
