//! Batch wire protocol.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     framing.rs (preamble, request/reply parts, terminator)
//!     → transport byte sink
//!
//! Inbound:
//!     transport byte chunks
//!     → parser.rs LineBuffer (rejoin lines split across chunks)
//!     → parser.rs PartParser (preamble, header/message/body blocks)
//!     → ParseEvent::{Preamble, Part, Malformed, End} to the owning side
//! ```
//!
//! # Design Decisions
//! - One flat boundary per connection, CRLF line endings only
//! - Malformed lines are reported as events, never abort the stream
//! - The parser is shared by both sides, specialised by the message block
//!   (`StatusBlock` on the client, `RequestBlock` on the server)

pub mod boundary;
pub mod framing;
pub mod parser;

use std::collections::HashMap;

use thiserror::Error;

pub use boundary::Boundary;
pub use parser::{
    LineBuffer, MessageBlock, ParseEvent, Part, PartParser, ReplyPart, RequestBlock, RequestPart,
    StatusBlock,
};

/// Header fields keyed by lower-cased name.
pub type HeaderFields = HashMap<String, String>;

/// Lifecycle of one batch connection, on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No boundary line has been seen yet.
    AwaitingPreamble,
    /// Parts are flowing.
    Streaming,
    /// End was requested or observed, outstanding work remains.
    Draining,
    /// Terminal marker handled and nothing is outstanding, or the transport failed.
    Closed,
}

/// Errors raised while framing or parsing the batch stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A header, status or request line did not match its grammar.
    #[error("malformed buffer line: {0}")]
    MalformedLine(String),

    /// The declared content type is not `multipart/mixed`.
    #[error("unsupported media type: {0:?}")]
    UnsupportedMediaType(String),

    /// `multipart/mixed` without a `boundary` parameter.
    #[error("multipart content type carries no boundary")]
    MissingBoundary,

    /// Boundary token is empty, too long, or contains forbidden characters.
    #[error("invalid boundary token: {0:?}")]
    InvalidBoundary(String),
}
