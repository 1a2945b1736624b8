//! Client side of a batch connection.
//!
//! # Data Flow
//! ```text
//! send(item)
//!     → connection.rs assigns Content-ID, frames the part
//!     → outbound channel → streaming request body
//!
//! streaming response body
//!     → protocol::PartParser<StatusBlock>
//!     → pending entry for Content-ID removed, PendingReply resolved
//! ```
//!
//! # Design Decisions
//! - One outbound stream per connection, opened lazily on first send
//! - Parts are written in send order; replies resolve in any order
//! - A transport failure resolves every pending entry with a `BatchError`
//! - A failed sub-request is still an `Ok(Reply)` with a non-2xx status

pub mod connection;
pub mod item;

use thiserror::Error;

pub use connection::{BatchConnection, PendingReply};
pub use item::{BatchItem, ItemBody, Reply};

/// Errors returned synchronously by the connection API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configuration has no target URL.
    #[error("a batch client requires a URL")]
    MissingUrl,

    #[error("invalid batch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A configured extra header has an invalid name or value.
    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    /// Programming error in the item passed to `send`.
    #[error("invalid item: {0}")]
    InvalidItem(&'static str),

    /// `connect` was called after `close`.
    #[error("connection was closed")]
    Closed,
}

/// Failure delivered in place of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// `send` was called after the connection was closed.
    #[error("connection was closed before calling send")]
    Closed,

    /// The batch request failed at the transport level.
    #[error("batch transport failed: {0}")]
    Transport(String),

    /// The batch endpoint answered with something other than a stream.
    #[error("batch endpoint rejected the connection with status {0}")]
    Rejected(u16),

    /// The stream ended while this reply was still pending.
    #[error("connection closed")]
    ConnectionLost,
}
