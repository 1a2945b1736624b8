//! Batched HTTP over a single streaming `multipart/mixed` exchange.
//!
//! # Architecture Overview
//!
//! ```text
//!   BatchConnection (client)                    Batch gateway (server)
//!  ┌────────────────────────┐   POST /batch    ┌──────────────────────────────┐
//!  │ send(item) → part N    │ ───────────────▶ │ middleware → Dispatcher      │
//!  │                        │  request parts   │   parser → backlog → JoinSet │──▶ downstream
//!  │ PendingReply ◀── id N  │ ◀─────────────── │   reply part per completion  │◀── HTTP service
//!  └────────────────────────┘   reply parts    └──────────────────────────────┘
//! ```
//!
//! Both directions share one boundary. Parts are correlated by `Content-ID`,
//! and replies arrive in completion order, not submission order.

// Wire format
pub mod protocol;

// Endpoints
pub mod client;
pub mod http;
pub mod server;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use client::{BatchConnection, BatchError, BatchItem, ClientError, PendingReply, Reply};
pub use config::{BatchConfig, ClientConfig, GatewayConfig};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use protocol::Boundary;
pub use server::{batch_middleware, BatchService};
