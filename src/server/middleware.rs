//! Axum middleware that turns a batch POST into a streamed multipart reply.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::stream;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::http::X_REQUEST_ID;
use crate::protocol::Boundary;
use crate::server::{BatchService, OUTBOUND_CAPACITY};

/// Serve `POST {batch.path}`, pass everything else through to `next`.
///
/// The response head is sent right away. Reply parts follow as their
/// sub-requests complete, so the client can keep writing its own body
/// while replies arrive.
pub async fn batch_middleware(
    State(service): State<BatchService>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::POST || request.uri().path() != service.config().path {
        return next.run(request).await;
    }

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = match Boundary::from_content_type(content_type) {
        Ok(boundary) => boundary,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting batch request");
            return (StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string()).into_response();
        }
    };

    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let (sink, outbound) = mpsc::channel(OUTBOUND_CAPACITY);
    let dispatcher = service.dispatcher(boundary.clone(), request.headers(), sink);
    let span = tracing::info_span!("batch", boundary = %boundary, request_id = %request_id);
    let inbound = request.into_body().into_data_stream();

    tokio::spawn(
        async move {
            if let Err(e) = dispatcher.run(inbound).await {
                tracing::warn!(error = %e, "Batch ended early");
            }
        }
        .instrument(span),
    );

    let body = Body::from_stream(stream::unfold(outbound, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
    }));

    ([(header::CONTENT_TYPE, boundary.content_type())], body).into_response()
}
