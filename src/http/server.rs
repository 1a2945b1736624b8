//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router around the batch middleware
//! - Wire up request ID and trace layers
//! - Serve until the shutdown signal fires

use axum::{
    http::{header, HeaderName, StatusCode},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ConfigError, GatewayConfig};
use crate::http::request::{MakeBatchRequestId, X_REQUEST_ID};
use crate::server::{batch_middleware, BatchService};

/// Standalone batch gateway.
///
/// Sub-requests go to `batch.upstream`, or back to the host that received
/// the batch when no upstream is configured.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let service = BatchService::new(config.batch.clone())?;
        Ok(Self::with_service(config, service))
    }

    /// Server around a prepared service, e.g. one with a custom downstream.
    pub fn with_service(config: GatewayConfig, service: BatchService) -> Self {
        let router = build_router(service);
        Self { router, config }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            batch_path = %self.config.batch.path,
            parallel_limit = self.config.batch.parallel_limit,
            "Batch gateway starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("Batch gateway stopped");
        Ok(())
    }
}

/// Router serving the batch endpoint, with 405 for other methods on its path.
pub fn build_router(service: BatchService) -> Router {
    let request_id = HeaderName::from_static(X_REQUEST_ID);
    let path = service.config().path.clone();

    Router::new()
        .route(&path, any(not_a_batch))
        .fallback(not_found)
        .layer(from_fn_with_state(service, batch_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeBatchRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
}

async fn not_a_batch() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        "batch endpoint accepts POST only",
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}
