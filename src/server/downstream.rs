//! Downstream HTTP service the dispatcher issues sub-requests to.

use std::time::Duration;

use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, Method};
use futures_util::future::{BoxFuture, FutureExt};
use thiserror::Error;

/// Response headers that describe the downstream connection, not the reply.
const HOP_BY_HOP: [HeaderName; 3] = [header::TRANSFER_ENCODING, header::CONNECTION, header::CONTENT_LENGTH];

/// One sub-request derived from a parsed part.
#[derive(Debug, Clone)]
pub struct SubRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// JSON-decoded part body.
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

/// What the downstream service answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SubResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownstreamError {
    #[error("sub-request timed out after {0:?}")]
    Timeout(Duration),

    #[error("sub-request failed: {0}")]
    Transport(String),
}

/// Executes sub-requests. Transport errors are returned, never panicked on,
/// and non-2xx statuses come back as ordinary responses.
pub trait Downstream: Send + Sync + 'static {
    fn call(&self, request: SubRequest) -> BoxFuture<'_, Result<SubResponse, DownstreamError>>;
}

/// `reqwest`-backed downstream.
#[derive(Debug, Clone, Default)]
pub struct HttpDownstream {
    client: reqwest::Client,
}

impl HttpDownstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Downstream for HttpDownstream {
    fn call(&self, request: SubRequest) -> BoxFuture<'_, Result<SubResponse, DownstreamError>> {
        async move {
            let timeout = request.timeout;
            let mut builder = self
                .client
                .request(request.method, request.url.as_str())
                .headers(request.headers)
                .timeout(timeout);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let classify = |e: reqwest::Error| {
                if e.is_timeout() {
                    DownstreamError::Timeout(timeout)
                } else {
                    DownstreamError::Transport(e.to_string())
                }
            };

            let response = builder.send().await.map_err(classify)?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter(|(name, _)| !HOP_BY_HOP.contains(*name))
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect();
            let body = response.text().await.map_err(classify)?;

            Ok(SubResponse { status, headers, body })
        }
        .boxed()
    }
}
