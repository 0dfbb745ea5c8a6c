//! `tokio-tungstenite` transport.
//!
//! [`connect`] performs the WebSocket upgrade with the negotiated
//! subprotocol; [`attach`] bridges an already-open socket to a client. One
//! pump task owns the socket: it writes every outbound frame in order and
//! forwards inbound frames to the client's dispatch path. Nothing is written
//! after a close frame, and the peer's answer to it is awaited for at most
//! the configured close timeout. WebSocket-level ping/pong is answered by
//! tungstenite itself.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gqlws_core::protocol::CloseFrame;
use gqlws_core::{ClientError, ConnectionId};
use gqlws_settings::ClientSettings;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async_with_config};
use tracing::{debug, info, warn};

use crate::client::GraphqlWsClient;
use crate::config::ClientConfig;
use crate::transport::{OutboundFrame, TransportChannels, TransportEvent};

/// Open a WebSocket to `url` and start a client on it.
///
/// The upgrade request carries `Sec-WebSocket-Protocol` plus any configured
/// extra headers and is bounded by the configured connect timeout.
pub async fn connect(url: &str, settings: &ClientSettings) -> Result<GraphqlWsClient, ClientError> {
    let ws_settings = &settings.websocket;
    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

    let headers = request.headers_mut();
    let protocol = HeaderValue::from_str(&ws_settings.subprotocol)
        .map_err(|e| ClientError::InvalidRequest(format!("subprotocol: {e}")))?;
    let _ = headers.insert(SEC_WEBSOCKET_PROTOCOL, protocol);
    for (name, value) in &ws_settings.headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidRequest(format!("header {name}: {e}")))?;
        let _ = headers.insert(header, value);
    }

    let mut ws_config = WebSocketConfig::default();
    if let Some(max) = ws_settings.max_message_size {
        ws_config.max_message_size = Some(max);
    }

    debug!(url, subprotocol = %ws_settings.subprotocol, "connecting");
    let (ws, _response) = tokio::time::timeout(
        ws_settings.connect_timeout(),
        connect_async_with_config(request, Some(ws_config), false),
    )
    .await
    .map_err(|_| {
        ClientError::Transport(format!(
            "connect timed out after {}ms",
            ws_settings.connect_timeout_ms
        ))
    })?
    .map_err(|e| ClientError::Transport(e.to_string()))?;

    let client = attach(ws, ClientConfig::from(settings));
    info!(url, connection_id = %client.id(), "websocket connected");
    Ok(client)
}

/// Start a client on an already-upgraded socket.
pub fn attach<S>(ws: WebSocketStream<S>, config: ClientConfig) -> GraphqlWsClient
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let close_timeout = config.close_timeout;
    let (client, channels) = GraphqlWsClient::start(config);
    let _ = tokio::spawn(pump(ws, channels, client.id().clone(), close_timeout));
    client
}

async fn pump<S>(
    ws: WebSocketStream<S>,
    channels: TransportChannels,
    connection_id: ConnectionId,
    close_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let TransportChannels {
        mut outbound,
        inbound,
    } = channels;
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut outbound_open = true;
    let mut sent_close: Option<CloseFrame> = None;
    // when to stop waiting for the peer's answer to `sent_close`
    let mut close_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            frame = outbound.recv(), if outbound_open => {
                let frame = match frame {
                    Some(frame) => frame,
                    None => {
                        // every client handle is gone
                        outbound_open = false;
                        OutboundFrame::Close(CloseFrame::normal())
                    }
                };
                if sent_close.is_some() {
                    debug!(%connection_id, ?frame, "dropping frame queued after close");
                    continue;
                }
                let message = match frame {
                    OutboundFrame::Text(text) => Message::Text(text.into()),
                    OutboundFrame::Close(frame) => {
                        let message = Message::Close(Some(to_ws_close(frame.clone())));
                        sent_close = Some(frame);
                        close_deadline = Instant::now().checked_add(close_timeout);
                        message
                    }
                };
                if let Err(err) = ws_tx.send(message).await {
                    let _ = inbound.send(TransportEvent::Error(err.to_string())).await;
                    break;
                }
            }
            () = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                warn!(%connection_id, timeout = ?close_timeout, "peer did not answer close frame");
                let _ = inbound.send(TransportEvent::Closed(sent_close.take())).await;
                break;
            }
            message = ws_rx.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => TransportEvent::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => TransportEvent::Text(text.to_owned()),
                        Err(_) => {
                            warn!(%connection_id, len = data.len(), "dropping non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let frame = frame.map(from_ws_close);
                        debug!(%connection_id, ?frame, "peer sent close frame");
                        let _ = inbound.send(TransportEvent::Closed(frame)).await;
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                    Some(Err(err)) => {
                        let _ = inbound.send(TransportEvent::Error(err.to_string())).await;
                        break;
                    }
                    None => {
                        // a peer that drops the socket after our close still ends it with our frame
                        let _ = inbound.send(TransportEvent::Closed(sent_close.take())).await;
                        break;
                    }
                };
                if inbound.send(event).await.is_err() {
                    debug!(%connection_id, "dispatch gone, stopping pump");
                    break;
                }
            }
        }
    }

    // flushes the close handshake reply, if any
    let _ = ws_tx.close().await;
    debug!(%connection_id, "websocket pump stopped");
}

fn to_ws_close(frame: CloseFrame) -> WsCloseFrame {
    WsCloseFrame {
        code: CloseCode::from(frame.code),
        reason: frame.reason.into(),
    }
}

fn from_ws_close(frame: WsCloseFrame) -> CloseFrame {
    CloseFrame::new(u16::from(frame.code), frame.reason.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_conversion() {
        let ws = to_ws_close(CloseFrame::new(1002, "Timeout waiting for a connection_ack message"));
        assert_eq!(u16::from(ws.code), 1002);
        assert_eq!(
            from_ws_close(ws),
            CloseFrame::new(1002, "Timeout waiting for a connection_ack message")
        );
    }

    #[test]
    fn normal_close_maps_to_1000() {
        let ws = to_ws_close(CloseFrame::normal());
        assert_eq!(ws.code, CloseCode::Normal);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let err = connect("not a url", &ClientSettings::default()).await.unwrap_err();
        assert_eq!(err.code(), gqlws_core::errors::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn invalid_header_is_rejected() {
        let mut settings = ClientSettings::default();
        let _ = settings
            .websocket
            .headers
            .insert("bad header".into(), "x".into());
        let err = connect("ws://127.0.0.1:1/graphql", &settings).await.unwrap_err();
        assert_eq!(err.code(), gqlws_core::errors::INVALID_REQUEST);
    }
}
