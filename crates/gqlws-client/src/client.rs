//! Operation Submission API.
//!
//! [`GraphqlWsClient`] is a cheap, cloneable handle to one connection.
//! Submissions suspend until the handshake settles, register the operation,
//! then send `subscribe`. The returned [`SingleResult`] / [`Subscription`]
//! handles cancel on drop: the operation is removed from the registry and,
//! if the removal won, a `complete` frame is sent.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use gqlws_core::protocol::{ClientMessage, CloseFrame};
use gqlws_core::{ClientError, ConnectionId, GraphqlRequest, OperationId};
use metrics::counter;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::config::ClientConfig;
use crate::lifecycle::{Connection, ConnectionState};
use crate::registry::{OperationKind, OperationResult, OperationSink};
use crate::router;
use crate::transport::{Outbound, TransportChannels};

/// Handle to one `graphql-transport-ws` connection.
#[derive(Clone)]
pub struct GraphqlWsClient {
    conn: Arc<Connection>,
}

impl GraphqlWsClient {
    /// Create a client and start the handshake.
    ///
    /// `connection_init` is queued on the returned outbound channel
    /// immediately. The caller wires [`TransportChannels`] to a real
    /// transport (see [`crate::websocket::attach`]). Must be called from
    /// within a tokio runtime.
    pub fn start(config: ClientConfig) -> (Self, TransportChannels) {
        let id = ConnectionId::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));

        let outbound = Outbound::new(outbound_tx, id.clone());
        let conn = Arc::new(Connection::new(id, config, outbound));
        conn.start_handshake();
        let _ = tokio::spawn(router::run_dispatch(Arc::downgrade(&conn), inbound_rx));

        let channels = TransportChannels {
            outbound: outbound_rx,
            inbound: inbound_tx,
        };
        (Self { conn }, channels)
    }

    /// Connection identifier used in logs.
    pub fn id(&self) -> &ConnectionId {
        &self.conn.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Close frame received from the peer, once closed.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        match self.conn.state() {
            ConnectionState::Closed { frame, .. } => frame,
            _ => None,
        }
    }

    /// Number of operations still awaiting a terminal message.
    pub fn pending_operations(&self) -> usize {
        self.conn.registry.len()
    }

    /// Wait for `connection_ack`.
    ///
    /// Fails with the handshake or close cause if the connection never
    /// becomes ready.
    pub async fn ready(&self) -> Result<(), ClientError> {
        self.conn.wait_ready().await
    }

    /// Start an operation expecting exactly one result.
    pub async fn submit_single(&self, request: GraphqlRequest) -> Result<SingleResult, ClientError> {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(request, OperationSink::Single(tx)).await?;
        Ok(SingleResult {
            id,
            conn: Arc::clone(&self.conn),
            rx,
        })
    }

    /// Start an operation producing a stream of results.
    ///
    /// `subscribe` is sent before this returns; results that arrive before
    /// the first poll are buffered.
    pub async fn submit_streaming(&self, request: GraphqlRequest) -> Result<Subscription, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.submit(request, OperationSink::Streaming(tx)).await?;
        Ok(Subscription {
            id,
            conn: Arc::clone(&self.conn),
            rx,
            cancelled: false,
        })
    }

    /// Submit a single-result operation and wait for its payload.
    pub async fn execute(&self, request: GraphqlRequest) -> Result<Value, ClientError> {
        self.submit_single(request).await?.await
    }

    /// Ask the peer to close the connection normally.
    ///
    /// New submissions fail from here on and cancellations stop writing.
    /// Pending operations are settled when the peer's close arrives.
    pub fn close(&self) {
        debug!(connection_id = %self.conn.id, "closing connection");
        if let Err(err) = self.conn.begin_close(CloseFrame::normal()) {
            debug!(connection_id = %self.conn.id, error = %err, "transport already gone");
        }
    }

    async fn submit(&self, request: GraphqlRequest, sink: OperationSink) -> Result<OperationId, ClientError> {
        let conn = &self.conn;
        let id = OperationId::new();
        let kind = sink.kind();

        conn.wait_ready().await.map_err(|cause| not_connected(conn, &cause))?;
        if conn.is_closing() {
            return Err(not_connected(conn, CLOSE_REQUESTED));
        }

        if let Err(err) = conn.registry.register(id.clone(), sink) {
            error!(connection_id = %conn.id, operation_id = %id, "operation id collision");
            return Err(err);
        }

        // Teardown or close() may have run between the readiness check and
        // registration.
        if !conn.accepts_writes() {
            if conn.registry.remove(&id).is_some() {
                return Err(match conn.state().cause() {
                    Some(cause) => not_connected(conn, cause),
                    None => not_connected(conn, CLOSE_REQUESTED),
                });
            }
            // teardown already settled the sink
            return Ok(id);
        }

        let subscribe = ClientMessage::Subscribe {
            id: id.clone(),
            payload: request,
        };
        if let Err(err) = conn.outbound.send(&subscribe) {
            let _ = conn.registry.remove(&id);
            return Err(err);
        }

        counter!("gqlws_operations_submitted_total", "kind" => kind.as_str()).increment(1);
        debug!(connection_id = %conn.id, operation_id = %id, %kind, "operation submitted");
        Ok(id)
    }
}

impl std::fmt::Debug for GraphqlWsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlWsClient")
            .field("id", &self.conn.id)
            .field("state", &self.conn.state().name())
            .field("pending", &self.conn.registry.len())
            .finish()
    }
}

const CLOSE_REQUESTED: &str = "close requested by the client";

fn not_connected(conn: &Connection, reason: impl std::fmt::Display) -> ClientError {
    ClientError::NotConnected {
        state: conn.status_name().to_string(),
        reason: reason.to_string(),
    }
}

/// Remove the operation and tell the server to stop it.
///
/// Does nothing if the operation already reached a terminal state.
fn cancel_operation(conn: &Connection, id: &OperationId, kind: OperationKind) {
    if conn.registry.remove(id).is_none() {
        return;
    }
    counter!("gqlws_operations_cancelled_total", "kind" => kind.as_str()).increment(1);
    debug!(connection_id = %conn.id, operation_id = %id, %kind, "operation cancelled");

    if !conn.accepts_writes() {
        return;
    }
    let complete = ClientMessage::Complete { id: id.clone() };
    if let Err(err) = conn.outbound.send(&complete) {
        debug!(connection_id = %conn.id, operation_id = %id, error = %err, "failed to send complete");
    }
}

/// Pending result of a single-result operation.
///
/// Resolves to the raw `next` payload or the error that terminated the
/// operation. Dropping it before resolution cancels the operation.
#[must_use = "dropping a SingleResult cancels the operation"]
pub struct SingleResult {
    id: OperationId,
    conn: Arc<Connection>,
    rx: oneshot::Receiver<OperationResult>,
}

impl SingleResult {
    /// Correlation ID of this operation.
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Stop waiting and send `complete` for this operation.
    pub fn cancel(self) {
        cancel_operation(&self.conn, &self.id, OperationKind::Single);
    }
}

impl Future for SingleResult {
    type Output = Result<Value, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.rx).poll(cx));
        Poll::Ready(result.unwrap_or(Err(ClientError::ConnectionLost)))
    }
}

impl Drop for SingleResult {
    fn drop(&mut self) {
        cancel_operation(&self.conn, &self.id, OperationKind::Single);
    }
}

impl std::fmt::Debug for SingleResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleResult").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Results of a streaming operation.
///
/// Yields each `next` payload in arrival order. Ends after `complete`, a
/// normal close, or the first error. Not restartable: subscribe again for a
/// fresh operation.
pub struct Subscription {
    id: OperationId,
    conn: Arc<Connection>,
    rx: mpsc::UnboundedReceiver<OperationResult>,
    cancelled: bool,
}

impl Subscription {
    /// Correlation ID of this operation.
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Stop the stream and send `complete` for this operation.
    ///
    /// Nothing is yielded afterwards, including results already buffered.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.rx.close();
        cancel_operation(&self.conn, &self.id, OperationKind::Streaming);
    }
}

impl Stream for Subscription {
    type Item = Result<Value, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}
