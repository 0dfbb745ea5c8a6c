//! Connection Lifecycle Manager.
//!
//! ```text
//! Uninitialized ──▶ Initializing ──ack──▶ Acknowledged
//!                        │                     │
//!                     timeout            close / error
//!                        ▼                     ▼
//!                      Failed               Closed
//! ```
//!
//! [`Connection`] is the per-connection state object every internal handler
//! receives. All state transitions happen here, each guarded so that it
//! fires only from the state it is defined for; a transition that loses a
//! race simply reports `false`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gqlws_core::protocol::{
    CLOSE_PROTOCOL_ERROR, ClientMessage, CloseFrame, HANDSHAKE_TIMEOUT_REASON,
};
use gqlws_core::{ClientError, ConnectionId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::registry::{OperationKind, OperationRegistry};
use crate::transport::Outbound;

/// Where a connection is in its lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    /// `connection_init` not sent yet.
    Uninitialized,
    /// Waiting for `connection_ack`.
    Initializing,
    /// Handshake done; operations flow.
    Acknowledged,
    /// Handshake failed. Terminal.
    Failed(ClientError),
    /// Connection ended. Terminal.
    Closed {
        /// Close frame received, if any.
        frame: Option<CloseFrame>,
        /// Error describing the close.
        cause: ClientError,
    },
}

impl ConnectionState {
    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Acknowledged => "acknowledged",
            Self::Failed(_) => "failed",
            Self::Closed { .. } => "closed",
        }
    }

    /// Neither failed nor closed.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Uninitialized | Self::Initializing | Self::Acknowledged
        )
    }

    /// Why the connection left the open states.
    pub fn cause(&self) -> Option<&ClientError> {
        match self {
            Self::Failed(cause) | Self::Closed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Shared per-connection state.
pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) config: ClientConfig,
    pub(crate) registry: OperationRegistry,
    pub(crate) outbound: Outbound,
    state: watch::Sender<ConnectionState>,
    handshake_timer: Mutex<Option<JoinHandle<()>>>,
    /// Set once a close frame has been queued; nothing is written after it.
    closing: AtomicBool,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, config: ClientConfig, outbound: Outbound) -> Self {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            id,
            config,
            registry: OperationRegistry::new(),
            outbound,
            state,
            handshake_timer: Mutex::new(None),
            closing: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    /// A close frame has been queued but the connection has not ended yet.
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Open and not closing: frames may still be written.
    pub(crate) fn accepts_writes(&self) -> bool {
        self.is_open() && !self.is_closing()
    }

    /// State name, reporting `closing` while a close is in flight.
    pub(crate) fn status_name(&self) -> &'static str {
        let state = self.state.borrow();
        if state.is_open() && self.is_closing() {
            "closing"
        } else {
            state.name()
        }
    }

    /// Queue `frame` as the last frame of this connection. Only the first
    /// call writes anything.
    pub(crate) fn begin_close(&self, frame: CloseFrame) -> Result<(), ClientError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            debug!(connection_id = %self.id, "close already in progress");
            return Ok(());
        }
        self.outbound.close(frame)
    }

    /// Apply `f` atomically; returns whether it changed the state.
    fn transition(&self, f: impl FnOnce(&mut ConnectionState) -> bool) -> bool {
        self.state.send_if_modified(f)
    }

    /// Suspend until the handshake settles.
    ///
    /// Resolves immediately once the state is terminal. The error is the
    /// failure or close cause.
    pub(crate) async fn wait_ready(&self) -> Result<(), ClientError> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| {
                !matches!(
                    state,
                    ConnectionState::Uninitialized | ConnectionState::Initializing
                )
            })
            .await
            .map(|state| (*state).clone());

        match settled {
            Ok(ConnectionState::Acknowledged) => Ok(()),
            Ok(state) => Err(state.cause().cloned().unwrap_or(ClientError::ConnectionLost)),
            Err(_) => Err(ClientError::ConnectionLost),
        }
    }

    // ── Handshake ───────────────────────────────────────────────────

    /// Send `connection_init` and arm the handshake timer.
    pub(crate) fn start_handshake(self: &Arc<Self>) {
        let started = self.transition(|state| {
            if matches!(state, ConnectionState::Uninitialized) {
                *state = ConnectionState::Initializing;
                true
            } else {
                false
            }
        });
        if !started {
            return;
        }

        info!(connection_id = %self.id, "sending connection_init");
        let init = ClientMessage::ConnectionInit {
            payload: self.config.init_payload.clone(),
        };
        if let Err(err) = self.outbound.send(&init) {
            warn!(connection_id = %self.id, error = %err, "failed to send connection_init");
            self.on_closed(None);
            return;
        }

        if let Some(window) = self.config.init_timeout {
            let conn = Arc::downgrade(self);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if let Some(conn) = conn.upgrade() {
                    conn.on_handshake_timeout(window);
                }
            });
            *self.handshake_timer.lock() = Some(timer);
        }
    }

    /// `connection_ack` received.
    pub(crate) fn on_ack(&self) {
        let acknowledged = self.transition(|state| {
            if matches!(state, ConnectionState::Initializing) {
                *state = ConnectionState::Acknowledged;
                true
            } else {
                false
            }
        });

        if acknowledged {
            self.disarm_handshake_timer();
            info!(connection_id = %self.id, "connection acknowledged");
        } else {
            debug!(
                connection_id = %self.id,
                state = self.state().name(),
                "ignoring connection_ack outside the handshake"
            );
        }
    }

    fn on_handshake_timeout(&self, window: Duration) {
        let cause = ClientError::HandshakeTimeout {
            timeout_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        };
        let failed = self.transition(|state| {
            if matches!(state, ConnectionState::Initializing) {
                *state = ConnectionState::Failed(cause.clone());
                true
            } else {
                false
            }
        });
        if !failed {
            return;
        }

        warn!(connection_id = %self.id, error = %cause, "handshake timed out, closing connection");
        counter!("gqlws_connections_closed_total", "kind" => "handshake_timeout").increment(1);
        let frame = CloseFrame::new(CLOSE_PROTOCOL_ERROR, HANDSHAKE_TIMEOUT_REASON);
        if let Err(err) = self.begin_close(frame) {
            debug!(connection_id = %self.id, error = %err, "transport already gone");
        }
        self.fail_all(&cause);
    }

    /// Abort the pending handshake timer. Safe to call any number of times.
    fn disarm_handshake_timer(&self) {
        if let Some(timer) = self.handshake_timer.lock().take() {
            timer.abort();
        }
    }

    // ── Keepalive ───────────────────────────────────────────────────

    /// `ping` received: answer with one `pong`.
    pub(crate) fn on_ping(&self) {
        if !self.accepts_writes() {
            debug!(connection_id = %self.id, "ignoring ping on a closing connection");
            return;
        }
        let pong = ClientMessage::Pong {
            payload: self.config.pong_payload.clone(),
        };
        if let Err(err) = self.outbound.send(&pong) {
            debug!(connection_id = %self.id, error = %err, "failed to send pong");
        }
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// The transport ended.
    ///
    /// A normal close fails pending single results with
    /// [`ClientError::ClosedBeforeData`] and completes pending streams. Any
    /// other close fails everything with the close code and reason; no frame
    /// at all fails everything with [`ClientError::ConnectionLost`].
    pub(crate) fn on_closed(&self, frame: Option<CloseFrame>) {
        self.disarm_handshake_timer();
        let cause = match &frame {
            Some(frame) => ClientError::ConnectionClosed {
                code: frame.code,
                reason: frame.reason.clone(),
            },
            None => ClientError::ConnectionLost,
        };

        let closed = self.transition(|state| {
            if state.is_open() {
                *state = ConnectionState::Closed {
                    frame: frame.clone(),
                    cause: cause.clone(),
                };
                true
            } else {
                false
            }
        });
        if closed {
            let kind = match &frame {
                Some(frame) if frame.is_normal() => "normal",
                Some(_) => "abnormal",
                None => "lost",
            };
            counter!("gqlws_connections_closed_total", "kind" => kind).increment(1);
            info!(connection_id = %self.id, close = ?frame, "connection closed");
        }

        match frame {
            Some(frame) if frame.is_normal() => self.finish_gracefully(),
            _ => self.fail_all(&cause),
        }
    }

    /// The transport reported an error.
    pub(crate) fn on_transport_error(&self, message: String) {
        self.disarm_handshake_timer();
        let cause = ClientError::Transport(message);
        let closed = self.transition(|state| {
            if state.is_open() {
                *state = ConnectionState::Closed {
                    frame: None,
                    cause: cause.clone(),
                };
                true
            } else {
                false
            }
        });
        if closed {
            counter!("gqlws_connections_closed_total", "kind" => "transport_error").increment(1);
            warn!(connection_id = %self.id, error = %cause, "transport failed");
        }
        self.fail_all(&cause);
    }

    fn finish_gracefully(&self) {
        for (id, sink) in self.registry.drain(OperationKind::Single) {
            debug!(connection_id = %self.id, operation_id = %id, "closed before data");
            sink.fail(ClientError::ClosedBeforeData);
        }
        for (id, sink) in self.registry.drain(OperationKind::Streaming) {
            debug!(connection_id = %self.id, operation_id = %id, "completing stream on close");
            sink.complete();
        }
    }

    fn fail_all(&self, cause: &ClientError) {
        for kind in [OperationKind::Single, OperationKind::Streaming] {
            for (id, sink) in self.registry.drain(kind) {
                debug!(connection_id = %self.id, operation_id = %id, %kind, "failing operation");
                sink.fail(cause.clone());
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disarm_handshake_timer();
    }
}
