//! # gqlws-client
//!
//! Client side of the `graphql-transport-ws` protocol: many concurrent
//! single-result and streaming operations multiplexed over one message-based
//! connection.
//!
//! - `registry`: correlation ID to result sink, with resolve-once removal
//! - `router`: classifies inbound frames and dispatches them
//! - [`lifecycle`]: handshake, keepalive, and close propagation
//! - [`client`]: [`GraphqlWsClient`], [`SingleResult`], [`Subscription`]
//! - [`transport`] / [`websocket`]: the channel boundary and its
//!   `tokio-tungstenite` implementation
//! - [`logging`]: subscriber setup driven by `ClientSettings::logging`
//!
//! ```no_run
//! # async fn demo() -> Result<(), gqlws_client::ClientError> {
//! use futures::StreamExt;
//! use gqlws_client::{GraphqlRequest, logging, websocket};
//!
//! let settings = gqlws_settings::load_settings().unwrap_or_default();
//! logging::init_subscriber(&settings.logging.level, settings.logging.json);
//! let client = websocket::connect("ws://localhost:4000/graphql", &settings).await?;
//! let data = client.execute(GraphqlRequest::new("{ hello }")).await?;
//!
//! let mut ticks = client
//!     .submit_streaming(GraphqlRequest::new("subscription { tick }"))
//!     .await?;
//! while let Some(tick) = ticks.next().await {
//!     println!("{}", tick?);
//! }
//! # let _ = data;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod lifecycle;
mod registry;
mod router;
pub mod transport;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use client::{GraphqlWsClient, SingleResult, Subscription};
pub use config::ClientConfig;
pub use gqlws_core::logging;
pub use gqlws_core::protocol::CloseFrame;
pub use gqlws_core::{ClientError, ConnectionId, GraphqlError, GraphqlRequest, OperationId};
pub use lifecycle::ConnectionState;
pub use registry::OperationKind;
pub use transport::{OutboundFrame, TransportChannels, TransportEvent};
