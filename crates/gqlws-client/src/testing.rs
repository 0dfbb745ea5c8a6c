//! In-memory transport for unit tests: the test plays the server by reading
//! `outbound` and writing `inbound`.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::transport::{OutboundFrame, TransportEvent};
use crate::{ClientConfig, GraphqlWsClient};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct Harness {
    pub(crate) client: GraphqlWsClient,
    pub(crate) outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    pub(crate) inbound: mpsc::Sender<TransportEvent>,
}

impl Harness {
    pub(crate) fn start(config: ClientConfig) -> Self {
        let (client, channels) = GraphqlWsClient::start(config);
        Self {
            client,
            outbound: channels.outbound,
            inbound: channels.inbound,
        }
    }

    /// Start and complete the handshake.
    pub(crate) async fn acked(config: ClientConfig) -> Self {
        let mut h = Self::start(config);
        assert_eq!(h.next_message().await["type"], "connection_init");
        h.send(serde_json::json!({"type": "connection_ack"})).await;
        h.client.ready().await.unwrap();
        h
    }

    pub(crate) async fn send(&self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub(crate) async fn send_raw(&self, text: &str) {
        self.event(TransportEvent::Text(text.to_owned())).await;
    }

    pub(crate) async fn event(&self, event: TransportEvent) {
        self.inbound.send(event).await.unwrap();
    }

    pub(crate) async fn next_frame(&mut self) -> OutboundFrame {
        tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("outbound channel closed")
    }

    pub(crate) async fn next_message(&mut self) -> Value {
        match self.next_frame().await {
            OutboundFrame::Text(text) => serde_json::from_str(&text).unwrap(),
            OutboundFrame::Close(frame) => panic!("expected a text frame, got close {frame}"),
        }
    }

    /// Read the next frame, which must be a `subscribe`, and return its ID.
    pub(crate) async fn next_subscribe_id(&mut self) -> String {
        let message = self.next_message().await;
        assert_eq!(message["type"], "subscribe", "{message}");
        message["id"].as_str().unwrap().to_owned()
    }

    /// Round-trip a ping so every earlier inbound frame has been dispatched.
    pub(crate) async fn sync(&mut self) {
        self.send(serde_json::json!({"type": "ping"})).await;
        let pong = self.next_message().await;
        assert_eq!(pong["type"], "pong", "{pong}");
    }

    /// Yield until the dispatch task has processed a close.
    pub(crate) async fn sync_closed(&self) {
        while self.client.state().is_open() {
            tokio::task::yield_now().await;
        }
    }
}
