//! Server side of the batch protocol.
//!
//! # Data Flow
//! ```text
//! POST {batch.path} (multipart/mixed)
//!     → middleware.rs (content type check, spawn dispatcher)
//!     → dispatcher.rs (parse parts, admit under parallel_limit, retry)
//!     → downstream.rs (one HTTP sub-request per part)
//!     → dispatcher.rs (frame reply part, write terminal boundary)
//!     → streamed response body
//! ```

pub mod dispatcher;
pub mod downstream;
pub mod middleware;

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::HeaderMap;
use tokio::sync::mpsc;

use crate::config::{validate_batch, BatchConfig, ConfigError};
use crate::protocol::Boundary;

pub use dispatcher::{DispatchError, Dispatcher};
pub use downstream::{Downstream, DownstreamError, HttpDownstream, SubRequest, SubResponse};
pub use middleware::batch_middleware;

use dispatcher::DispatchContext;

/// Frames buffered between a dispatcher and the response body.
pub const OUTBOUND_CAPACITY: usize = 32;

/// Shared state behind the batch endpoint.
#[derive(Clone)]
pub struct BatchService {
    config: Arc<BatchConfig>,
    downstream: Arc<dyn Downstream>,
}

impl BatchService {
    /// Service sending sub-requests over HTTP.
    pub fn new(config: BatchConfig) -> Result<Self, ConfigError> {
        Self::with_downstream(config, Arc::new(HttpDownstream::new()))
    }

    pub fn with_downstream(config: BatchConfig, downstream: Arc<dyn Downstream>) -> Result<Self, ConfigError> {
        validate_batch(&config).map_err(ConfigError::Validation)?;
        Ok(Self {
            config: Arc::new(config),
            downstream,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Dispatcher for one batch connection writing frames to `sink`.
    pub fn dispatcher(&self, boundary: Boundary, request_headers: &HeaderMap, sink: mpsc::Sender<Bytes>) -> Dispatcher {
        let ctx = DispatchContext::new(Arc::clone(&self.config), Arc::clone(&self.downstream), request_headers);
        Dispatcher::new(Arc::new(ctx), boundary, sink)
    }
}
