//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! settings file only needs the keys it wants to change.

use std::collections::BTreeMap;
use std::time::Duration;

use gqlws_core::protocol::{SUBPROTOCOL, keepalive_payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root settings type.
///
/// ```json
/// {
///   "connection": { "initTimeoutMs": 5000, "initPayload": { "token": "..." } },
///   "websocket": { "headers": { "Authorization": "Bearer ..." } },
///   "logging": { "level": "gqlws_client=debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Protocol-level connection behavior.
    pub connection: ConnectionSettings,
    /// WebSocket upgrade settings.
    pub websocket: WebSocketSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

/// Protocol-level connection behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// How long to wait for `connection_ack`. `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_timeout_ms: Option<u64>,
    /// Payload sent with `connection_init`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_payload: Option<Value>,
    /// Payload sent with every keepalive `pong`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_payload: Option<Value>,
    /// Capacity of the inbound transport event queue.
    pub inbound_buffer: usize,
}

impl ConnectionSettings {
    /// Handshake window as a [`Duration`].
    pub fn init_timeout(&self) -> Option<Duration> {
        self.init_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            init_timeout_ms: None,
            init_payload: None,
            pong_payload: Some(keepalive_payload()),
            inbound_buffer: 256,
        }
    }
}

/// WebSocket upgrade settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Value of the `Sec-WebSocket-Protocol` request header.
    pub subprotocol: String,
    /// Extra headers sent with the upgrade request.
    pub headers: BTreeMap<String, String>,
    /// Timeout for TCP connect plus the upgrade handshake.
    pub connect_timeout_ms: u64,
    /// How long to wait for the peer to answer a close frame we sent.
    pub close_timeout_ms: u64,
    /// Largest inbound message accepted by the socket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
}

impl WebSocketSettings {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Close handshake timeout as a [`Duration`].
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            subprotocol: SUBPROTOCOL.to_string(),
            headers: BTreeMap::new(),
            connect_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
            max_message_size: None,
        }
    }
}

/// Logging output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive.
    pub level: String,
    /// Emit JSON lines instead of the compact text format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
