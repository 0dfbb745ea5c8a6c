//! Runtime configuration for one connection.

use std::time::Duration;

use gqlws_settings::ClientSettings;
use serde_json::Value;

/// Per-connection behavior, usually built from [`ClientSettings`].
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// How long to wait for `connection_ack`. `None` waits forever.
    pub init_timeout: Option<Duration>,
    /// Payload of `connection_init`.
    pub init_payload: Option<Value>,
    /// Payload of keepalive `pong` replies.
    pub pong_payload: Option<Value>,
    /// Capacity of the inbound transport event queue.
    pub inbound_buffer: usize,
    /// How long a transport waits for the peer to answer our close frame.
    pub close_timeout: Duration,
}

impl ClientConfig {
    /// Set the handshake window.
    #[must_use]
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Set the close handshake window.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the `connection_init` payload.
    #[must_use]
    pub fn with_init_payload(mut self, payload: Value) -> Self {
        self.init_payload = Some(payload);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        let connection = &settings.connection;
        Self {
            init_timeout: connection.init_timeout(),
            init_payload: connection.init_payload.clone(),
            pong_payload: connection.pong_payload.clone(),
            inbound_buffer: connection.inbound_buffer.max(1),
            close_timeout: settings.websocket.close_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_has_no_timeout_and_keepalive_pong() {
        let config = ClientConfig::default();
        assert!(config.init_timeout.is_none());
        assert!(config.init_payload.is_none());
        assert_eq!(config.pong_payload, Some(json!({"message": "keepalive"})));
        assert_eq!(config.inbound_buffer, 256);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
    }

    #[test]
    fn from_settings() {
        let mut settings = ClientSettings::default();
        settings.connection.init_timeout_ms = Some(1500);
        settings.connection.init_payload = Some(json!({"token": "abc"}));
        settings.connection.inbound_buffer = 0;
        settings.websocket.close_timeout_ms = 250;

        let config = ClientConfig::from(&settings);
        assert_eq!(config.init_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.init_payload, Some(json!({"token": "abc"})));
        assert_eq!(config.inbound_buffer, 1);
        assert_eq!(config.close_timeout, Duration::from_millis(250));
    }

    #[test]
    fn builders() {
        let config = ClientConfig::default()
            .with_init_timeout(Duration::from_secs(3))
            .with_init_payload(json!({"k": 1}));
        assert_eq!(config.init_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.init_payload, Some(json!({"k": 1})));
    }
}
