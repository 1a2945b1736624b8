//! Request ID assignment.
//!
//! # Design Decisions
//! - IDs are UUID v4, generated before any other layer runs
//! - An ID supplied by the caller is kept and echoed back

use axum::http::{HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Header carrying the request ID, on both the request and the response.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a fresh UUID v4 for requests arriving without an ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeBatchRequestId;

impl MakeRequestId for MakeBatchRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}
