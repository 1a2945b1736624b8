//! HTTP surface of the batch gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (assign x-request-id)
//!     → server.rs (trace layer, router)
//!     → server::middleware (batch POSTs)
//!     → 405 / 404 for everything else
//! ```

pub mod request;
pub mod server;

pub use request::{MakeBatchRequestId, X_REQUEST_ID};
pub use server::{build_router, GatewayServer};
