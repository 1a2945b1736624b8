//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

use batch_requests::config::{BatchConfig, GatewayConfig};
use batch_requests::protocol::{framing, Boundary};
use batch_requests::server::{batch_middleware, BatchService, HttpDownstream};
use batch_requests::{BatchConnection, ClientConfig, GatewayServer};

#[derive(Clone)]
struct EchoState {
    flaky_hits: Arc<AtomicU32>,
    flaky_failures: u32,
}

/// Echo service with the batch middleware in front, on an ephemeral port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub flaky_hits: Arc<AtomicU32>,
}

impl TestApp {
    pub fn batch_url(&self) -> String {
        format!("http://{}/batch", self.addr)
    }

    pub fn connection(&self, config: ClientConfig) -> BatchConnection {
        BatchConnection::with_client(&config, http_client()).unwrap()
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.batch_url())
    }
}

pub fn batch_config(retries: u32) -> BatchConfig {
    BatchConfig {
        parallel_limit: 4,
        protocol: "http".to_string(),
        timeout_ms: 2_000,
        retries,
        retry_jitter_ms: 0,
        retry_step_ms: 1,
        ..BatchConfig::default()
    }
}

/// Client connection to an arbitrary batch endpoint.
pub fn connect(addr: SocketAddr) -> BatchConnection {
    let config = ClientConfig::new(format!("http://{}/batch", addr));
    BatchConnection::with_client(&config, http_client()).unwrap()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// `/flaky` answers 503 for its first `flaky_failures` hits.
pub async fn start_app(config: BatchConfig, flaky_failures: u32) -> TestApp {
    let flaky_hits = Arc::new(AtomicU32::new(0));
    let state = EchoState {
        flaky_hits: flaky_hits.clone(),
        flaky_failures,
    };

    let downstream = Arc::new(HttpDownstream::with_client(http_client()));
    let service = BatchService::with_downstream(config, downstream).unwrap();

    let app = Router::new()
        .route("/echo/{*rest}", any(echo))
        .route("/flaky", any(flaky))
        .route("/batch", get(|| async { "batch endpoint" }))
        .with_state(state)
        .layer(from_fn_with_state(service, batch_middleware));

    let addr = serve(app).await;
    TestApp { addr, flaky_hits }
}

/// Standalone gateway forwarding sub-requests to `upstream`.
pub async fn start_gateway(upstream: SocketAddr) -> SocketAddr {
    let mut config = GatewayConfig::default();
    config.batch = BatchConfig {
        upstream: Some(upstream.to_string()),
        ..batch_config(0)
    };

    let downstream = Arc::new(HttpDownstream::with_client(http_client()));
    let service = BatchService::with_downstream(config.batch.clone(), downstream).unwrap();
    let router = GatewayServer::with_service(config, service).router();

    serve(router).await
}

/// Batch endpoint answering every POST with `status` before any framing.
pub async fn start_rejecting_endpoint(status: StatusCode) -> SocketAddr {
    let router = Router::new().route("/batch", any(move || async move { (status, "rejected") }));
    serve(router).await
}

/// Batch endpoint that streams a preamble and one reply nobody asked for,
/// then ends the response without the terminal boundary.
pub async fn start_truncating_endpoint() -> SocketAddr {
    let router = Router::new().route("/batch", any(truncated_batch));
    serve(router).await
}

async fn truncated_batch(headers: HeaderMap) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = Boundary::from_content_type(content_type).unwrap();

    let mut body = framing::PREAMBLE.to_string();
    body.push_str(&framing::reply_part(&boundary, Some("999"), 200, &[], "{}"));
    body.push_str("\r\n");
    body.push_str(&boundary.delimiter());
    body.push_str("\r\n");

    ([(header::CONTENT_TYPE, boundary.content_type())], body)
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Value> {
    let headers: Map<String, Value> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), Value::String(value.to_string())))
        })
        .collect();
    let body = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "headers": headers,
        "body": body,
    }))
}

async fn flaky(State(state): State<EchoState>) -> impl IntoResponse {
    let hit = state.flaky_hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit <= state.flaky_failures {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "hit": hit })))
    } else {
        (StatusCode::OK, Json(json!({ "hit": hit })))
    }
}
