//! # gqlws-core
//!
//! Foundation types shared by the gqlws crates.
//!
//! - **Branded IDs**: `OperationId`, `ConnectionId` as newtypes for type safety
//! - **Requests**: [`GraphqlRequest`], the serialized request consumed from callers
//! - **Protocol**: [`protocol::ClientMessage`] / [`protocol::ServerMessage`],
//!   the `graphql-transport-ws` frames, plus close codes
//! - **Errors**: [`ClientError`] taxonomy and structured [`GraphqlError`]s
//! - **Logging**: `tracing` subscriber bootstrap and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod request;

pub use errors::{ClientError, ErrorLocation, GraphqlError};
pub use ids::{ConnectionId, OperationId};
pub use request::GraphqlRequest;
