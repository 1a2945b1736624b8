//! Batch gateway binary.
//!
//! Accepts batched requests on `batch.path` and fans them out to the
//! configured upstream.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use batch_requests::config::{load_config, GatewayConfig};
use batch_requests::lifecycle::{wait_for_signal, Shutdown};
use batch_requests::observability::{logging, metrics};
use batch_requests::GatewayServer;

#[derive(Parser, Debug)]
#[command(name = "batch-requests", version, about = "Streaming batch request gateway")]
struct Args {
    /// Path to the TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "batch-requests starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        batch_path = %config.batch.path,
        parallel_limit = config.batch.parallel_limit,
        retries = config.batch.retries,
        upstream = config.batch.upstream.as_deref().unwrap_or("<request host>"),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config)?;
    let stop = shutdown.subscribe();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    server.run(listener, stop).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
