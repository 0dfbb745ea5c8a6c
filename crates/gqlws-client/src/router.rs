//! Message Router: the single inbound dispatch path of a connection.

use std::sync::Weak;

use gqlws_core::protocol::ServerMessage;
use gqlws_core::{ClientError, GraphqlError, OperationId};
use metrics::counter;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::lifecycle::Connection;
use crate::registry::{EmitOutcome, OperationKind, OperationSink};
use crate::transport::TransportEvent;

const COMPLETE_BEFORE_DATA: &str =
    "received a 'complete' message for this operation before the actual data";

/// Drain transport events until the connection ends or every client handle
/// is gone.
pub(crate) async fn run_dispatch(conn: Weak<Connection>, mut inbound: mpsc::Receiver<TransportEvent>) {
    loop {
        let event = inbound.recv().await;
        let Some(conn) = conn.upgrade() else {
            break;
        };
        match event {
            Some(TransportEvent::Text(text)) => route_text(&conn, &text),
            Some(TransportEvent::Closed(frame)) => {
                conn.on_closed(frame);
                break;
            }
            Some(TransportEvent::Error(message)) => {
                conn.on_transport_error(message);
                break;
            }
            None => {
                conn.on_closed(None);
                break;
            }
        }
    }
}

/// Parse and dispatch one text frame. Malformed frames are logged and
/// dropped.
pub(crate) fn route_text(conn: &Connection, text: &str) {
    trace!(connection_id = %conn.id, "<<< {text}");
    match ServerMessage::parse(text) {
        Ok(message) => {
            counter!("gqlws_messages_received_total", "type" => message.kind()).increment(1);
            route(conn, message);
        }
        Err(err) => {
            counter!("gqlws_malformed_messages_total").increment(1);
            warn!(connection_id = %conn.id, error = %err, "discarding malformed message");
        }
    }
}

fn route(conn: &Connection, message: ServerMessage) {
    match message {
        ServerMessage::ConnectionAck { .. } => conn.on_ack(),
        ServerMessage::Ping { .. } => conn.on_ping(),
        ServerMessage::Pong { .. } => trace!(connection_id = %conn.id, "pong"),
        ServerMessage::Next { id, payload } => on_next(conn, &id, payload),
        ServerMessage::Error { id, payload } => on_error(conn, &id, payload),
        ServerMessage::Complete { id } => on_complete(conn, &id),
        ServerMessage::ConnectionInit { .. } | ServerMessage::Subscribe { .. } => {
            debug!(
                connection_id = %conn.id,
                message_type = message.kind(),
                "ignoring client-only message"
            );
        }
    }
}

fn on_next(conn: &Connection, id: &OperationId, payload: Value) {
    // A single result is terminal on its first `next`; servers may never
    // send the trailing `complete`.
    if let Some(OperationSink::Single(tx)) = conn.registry.remove_kind(id, OperationKind::Single) {
        if tx.send(Ok(payload)).is_err() {
            debug!(connection_id = %conn.id, operation_id = %id, "result receiver dropped");
        }
        return;
    }

    match conn.registry.emit(id, payload) {
        EmitOutcome::Delivered => {}
        EmitOutcome::Cancelled => {
            warn!(
                connection_id = %conn.id,
                operation_id = %id,
                "received data for already cancelled operation"
            );
        }
        EmitOutcome::Unknown => {
            warn!(
                connection_id = %conn.id,
                operation_id = %id,
                "received data for unknown operation"
            );
        }
    }
}

fn on_error(conn: &Connection, id: &OperationId, errors: Vec<GraphqlError>) {
    let Some(sink) = conn.registry.remove(id) else {
        warn!(connection_id = %conn.id, operation_id = %id, "received error for unknown operation");
        return;
    };
    debug!(
        connection_id = %conn.id,
        operation_id = %id,
        count = errors.len(),
        "operation failed"
    );
    sink.fail(ClientError::Operation { errors });
}

fn on_complete(conn: &Connection, id: &OperationId) {
    match conn.registry.remove(id) {
        Some(sink @ OperationSink::Single(_)) => {
            warn!(connection_id = %conn.id, operation_id = %id, "{COMPLETE_BEFORE_DATA}");
            sink.fail(ClientError::ProtocolViolation(COMPLETE_BEFORE_DATA.into()));
        }
        Some(sink @ OperationSink::Streaming(_)) => {
            debug!(connection_id = %conn.id, operation_id = %id, "stream completed");
            sink.complete();
        }
        None => {
            debug!(
                connection_id = %conn.id,
                operation_id = %id,
                "complete for finished or unknown operation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientConfig;
    use crate::testing::Harness;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use gqlws_core::GraphqlRequest;
    use gqlws_core::logging::capture_logs;
    use serde_json::json;
    use tracing::Level;

    #[tokio::test]
    async fn next_resolves_single_without_complete() {
        let mut h = Harness::acked(ClientConfig::default()).await;
        let single = h.client.submit_single(GraphqlRequest::new("{ a }")).await.unwrap();
        let id = h.next_subscribe_id().await;

        h.send(json!({"type": "next", "id": id, "payload": {"data": {"a": 1}}}))
            .await;
        assert_eq!(single.await.unwrap(), json!({"data": {"a": 1}}));
        assert_eq!(h.client.pending_operations(), 0);
    }

    #[tokio::test]
    async fn complete_after_data_is_a_noop() {
        let (logs, _guard) = capture_logs();
        let mut h = Harness::acked(ClientConfig::default()).await;
        let single = h.client.submit_single(GraphqlRequest::new("{ a }")).await.unwrap();
        let id = h.next_subscribe_id().await;

        h.send(json!({"type": "next", "id": id, "payload": {"data": null}}))
            .await;
        h.send(json!({"type": "complete", "id": id})).await;
        assert_eq!(single.await.unwrap(), json!({"data": null}));
        h.sync().await;

        assert_eq!(h.client.pending_operations(), 0);
        assert_eq!(logs.count_matching(Level::WARN, "operation"), 0);
    }

    #[tokio::test]
    async fn complete_before_data_is_a_protocol_violation() {
        let mut h = Harness::acked(ClientConfig::default()).await;
        let single = h.client.submit_single(GraphqlRequest::new("{ a }")).await.unwrap();
        let id = h.next_subscribe_id().await;

        h.send(json!({"type": "complete", "id": id})).await;
        let err = single.await.unwrap_err();
        assert_matches!(err, ClientError::ProtocolViolation(ref msg) if msg.contains("before the actual data"));
        assert!(h.client.state().is_open());
    }

    #[tokio::test]
    async fn error_frame_fails_only_that_operation() {
        let mut h = Harness::acked(ClientConfig::default()).await;
        let failing = h.client.submit_single(GraphqlRequest::new("{ bad }")).await.unwrap();
        let failing_id = h.next_subscribe_id().await;
        let healthy = h.client.submit_single(GraphqlRequest::new("{ good }")).await.unwrap();
        let healthy_id = h.next_subscribe_id().await;

        h.send(json!({
            "type": "error",
            "id": failing_id,
            "payload": [
                {"message": "first", "path": ["bad"]},
                {"message": "second", "extensions": {"code": "E2"}}
            ]
        }))
        .await;
        h.send(json!({"type": "next", "id": healthy_id, "payload": {"data": {"good": true}}}))
            .await;

        let err = failing.await.unwrap_err();
        let messages: Vec<_> = err.graphql_errors().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
        assert_eq!(err.graphql_errors()[1].code(), Some("E2"));
        assert_eq!(healthy.await.unwrap(), json!({"data": {"good": true}}));
    }

    #[tokio::test]
    async fn error_frame_ends_stream() {
        let mut h = Harness::acked(ClientConfig::default()).await;
        let mut stream = h
            .client
            .submit_streaming(GraphqlRequest::new("subscription { s }"))
            .await
            .unwrap();
        let id = h.next_subscribe_id().await;

        h.send(json!({"type": "error", "id": id, "payload": {"message": "denied"}}))
            .await;
        assert_matches!(stream.next().await, Some(Err(ClientError::Operation { .. })));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn stream_delivers_in_order_until_complete() {
        let mut h = Harness::acked(ClientConfig::default()).await;
        let mut stream = h
            .client
            .submit_streaming(GraphqlRequest::new("subscription { tick }"))
            .await
            .unwrap();
        let id = h.next_subscribe_id().await;

        for n in 0..3 {
            h.send(json!({"type": "next", "id": id, "payload": {"data": {"tick": n}}}))
                .await;
        }
        h.send(json!({"type": "complete", "id": id})).await;

        let items: Vec<_> = stream.map(Result::unwrap).collect().await;
        assert_eq!(
            items,
            [
                json!({"data": {"tick": 0}}),
                json!({"data": {"tick": 1}}),
                json!({"data": {"tick": 2}}),
            ]
        );
        assert_eq!(h.client.pending_operations(), 0);
    }

    #[tokio::test]
    async fn ping_gets_exactly_one_pong() {
        let mut h = Harness::acked(ClientConfig::default()).await;
        let _pending = h.client.submit_single(GraphqlRequest::new("{ slow }")).await.unwrap();
        let _ = h.next_subscribe_id().await;

        h.send(json!({"type": "ping"})).await;
        assert_eq!(
            h.next_message().await,
            json!({"type": "pong", "payload": {"message": "keepalive"}})
        );
        tokio::task::yield_now().await;
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn ping_before_ack_is_answered() {
        let mut h = Harness::start(ClientConfig::default());
        assert_eq!(h.next_message().await["type"], "connection_init");
        h.send(json!({"type": "ping", "payload": {"t": 1}})).await;
        assert_eq!(h.next_message().await["type"], "pong");
    }

    #[tokio::test]
    async fn custom_pong_payload() {
        let config = ClientConfig {
            pong_payload: None,
            ..ClientConfig::default()
        };
        let mut h = Harness::acked(config).await;
        h.send(json!({"type": "ping"})).await;
        assert_eq!(h.next_message().await, json!({"type": "pong"}));
    }

    #[tokio::test]
    async fn duplicate_ack_is_ignored() {
        let (logs, _guard) = capture_logs();
        let mut h = Harness::acked(ClientConfig::default()).await;
        h.send(json!({"type": "connection_ack"})).await;
        h.sync().await;
        assert_eq!(h.client.state(), crate::ConnectionState::Acknowledged);
        assert!(logs.has_event(Level::DEBUG, "ignoring connection_ack"));
    }

    #[tokio::test]
    async fn malformed_frames_are_not_fatal() {
        let (logs, _guard) = capture_logs();
        let mut h = Harness::acked(ClientConfig::default()).await;
        let single = h.client.submit_single(GraphqlRequest::new("{ a }")).await.unwrap();
        let id = h.next_subscribe_id().await;

        h.send_raw("{not json").await;
        h.send(json!({"type": "mystery", "id": id})).await;
        h.send(json!({"type": "next"})).await;
        h.send(json!({"type": "next", "id": id, "payload": {"data": {"a": 2}}}))
            .await;

        assert_eq!(single.await.unwrap(), json!({"data": {"a": 2}}));
        assert_eq!(logs.count_matching(Level::WARN, "malformed"), 3);
        assert!(h.client.state().is_open());
    }

    #[tokio::test]
    async fn unknown_operation_data_is_logged() {
        let (logs, _guard) = capture_logs();
        let mut h = Harness::acked(ClientConfig::default()).await;
        h.send(json!({"type": "next", "id": "ghost", "payload": {}})).await;
        h.send(json!({"type": "error", "id": "ghost", "payload": []})).await;
        h.sync().await;

        assert!(logs.has_event(Level::WARN, "received data for unknown operation"));
        assert!(logs.has_event(Level::WARN, "received error for unknown operation"));
        let event = logs
            .events()
            .into_iter()
            .find(|e| e.message.contains("data for unknown"))
            .unwrap();
        assert_eq!(event.field("operation_id"), Some("ghost"));
    }

    #[tokio::test]
    async fn client_only_frames_are_ignored() {
        let mut h = Harness::acked(ClientConfig::default()).await;
        h.send(json!({"type": "connection_init"})).await;
        h.send(json!({"type": "subscribe", "id": "x", "payload": {"query": "{ a }"}}))
            .await;
        h.send(json!({"type": "pong"})).await;
        h.sync().await;
        assert_eq!(h.client.state(), crate::ConnectionState::Acknowledged);
    }
}
